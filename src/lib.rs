use std::sync::Arc;

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod transport;

use cache::{CacheStore, EntityCache, DEVICE_PREFIX, LOCATION_PREFIX, SESSION_PREFIX, USER_DEVICES_PREFIX};
use config::Config;
use services::devices::DeviceRegistry;
use services::events::EventBus;
use services::location::{CachedLocationResolver, PassthroughResolver};
use services::sessions::SessionRegistry;
use services::tracker::DeviceTracker;
use services::two_factor::TwoFactorService;
use services::ua::TokenProfiler;
use storage::postgres::{PgDeviceStore, PgSessionStore, PgTwoFactorStore};
use transport::Transport;

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub two_factor: Arc<TwoFactorService>,
    pub tracker: Arc<DeviceTracker>,
    pub transport: Transport,
    pub events: EventBus,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the registries onto Postgres storage and the given cache
    /// backend. Used by both the server and the cleanup binary.
    pub fn build(config: Config, db: sqlx::PgPool, cache_store: Arc<dyn CacheStore>) -> Self {
        let devices_cfg = &config.devices;
        let events = EventBus::default();

        let entity_cache = |prefix: &'static str, ttl| {
            EntityCache::new(
                cache_store.clone(),
                prefix,
                devices_cfg.cache_enabled(prefix),
                ttl,
            )
        };
        let device_cache = entity_cache(DEVICE_PREFIX, devices_cfg.device_cache_ttl);
        let session_cache = entity_cache(SESSION_PREFIX, devices_cfg.session_cache_ttl);
        let location_cache = entity_cache(LOCATION_PREFIX, devices_cfg.location_cache_ttl);
        let user_devices_cache =
            entity_cache(USER_DEVICES_PREFIX, devices_cfg.user_devices_cache_ttl);

        let two_factor = Arc::new(TwoFactorService::new(Arc::new(PgTwoFactorStore::new(
            db.clone(),
        ))));
        let location = Arc::new(CachedLocationResolver::new(
            Arc::new(PassthroughResolver),
            location_cache,
        ));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(PgSessionStore::new(db.clone())),
            two_factor.clone(),
            location,
            session_cache,
            events.clone(),
            devices_cfg.session_lifetime,
        ));
        let devices = Arc::new(DeviceRegistry::new(
            Arc::new(PgDeviceStore::new(db)),
            sessions.clone(),
            device_cache,
            user_devices_cache,
            events.clone(),
        ));

        let transport = Transport::new(devices_cfg.clone());
        let tracker = Arc::new(DeviceTracker::new(
            transport.clone(),
            devices.clone(),
            sessions.clone(),
            Arc::new(TokenProfiler),
            events.clone(),
            devices_cfg.clone(),
        ));

        Self {
            devices,
            sessions,
            two_factor,
            tracker,
            transport,
            events,
            config: Arc::new(config),
        }
    }
}
