use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devicetrail::{config::Config, storage::redis::RedisClient, AppState};

/// Clean up compromised and unused devices.
#[derive(Debug, Parser)]
#[command(name = "cleanup")]
struct Args {
    /// Also hard-delete hijacked devices
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devicetrail=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load();

    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url())
        .await?;
    let redis = RedisClient::new(&config.redis_url()).await?;

    let state = AppState::build(config, db, Arc::new(redis));
    let report = state.devices.cleanup(args.force).await?;

    println!("Deleted {} orphaned devices.", report.orphaned);
    if args.force {
        println!("Deleted {} hijacked devices.", report.hijacked);
    }

    Ok(())
}
