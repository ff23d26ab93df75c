use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
}

/// Device tracking knobs. Carrier names, precedence and cache behavior are
/// configuration, never hardcoded at call sites.
#[derive(Debug, Clone)]
pub struct DevicesConfig {
    /// Carrier the id is written back through on responses.
    pub transport: String,
    /// Carrier order tried when resolving an id from a request.
    pub precedence: Vec<String>,
    pub cookie_name: String,
    pub header_name: String,
    pub session_key: String,
    /// Query/body parameter tried when no carrier yields a value.
    pub request_param: String,
    pub secure_cookie: bool,
    pub http_only_cookie: bool,
    pub fingerprinting_enabled: bool,
    pub fingerprint_cookie_name: String,
    pub track_guest_sessions: bool,
    /// Re-issue a fresh id when the stored one fails to parse.
    pub regenerate_lost_devices: bool,
    pub session_lifetime: Duration,
    pub cache_enabled_for: Vec<String>,
    pub device_cache_ttl: Duration,
    pub session_cache_ttl: Duration,
    pub location_cache_ttl: Duration,
    pub user_devices_cache_ttl: Duration,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("DB_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5432),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
                database: env::var("DB_NAME").unwrap_or_else(|_| "devicetrail".to_string()),
                ssl_mode: env::var("DB_SSL_MODE").unwrap_or_else(|_| "disable".to_string()),
                max_connections: env::var("DB_MAX_CONNS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(25),
            },
            redis: RedisConfig {
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("REDIS_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(6379),
                password: env::var("REDIS_PASSWORD").ok(),
                db: env::var("REDIS_DB")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "super-secret-jwt-key-change-in-production".to_string()),
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "devicetrail".to_string()),
            },
            devices: DevicesConfig {
                transport: env::var("DEVICE_ID_TRANSPORT").unwrap_or_else(|_| "cookie".to_string()),
                precedence: env_list(
                    "DEVICE_ID_PRECEDENCE",
                    &["cookie", "header", "session"],
                ),
                cookie_name: env::var("DEVICE_ID_COOKIE_NAME")
                    .unwrap_or_else(|_| "device_id".to_string()),
                header_name: env::var("DEVICE_ID_HEADER_NAME")
                    .unwrap_or_else(|_| "X-Device-Id".to_string()),
                session_key: env::var("DEVICE_ID_SESSION_KEY")
                    .unwrap_or_else(|_| "device:id".to_string()),
                request_param: env::var("DEVICE_ID_REQUEST_PARAM")
                    .unwrap_or_else(|_| "_device_id".to_string()),
                secure_cookie: env_flag("DEVICE_ID_SECURE_COOKIE", true),
                http_only_cookie: env_flag("DEVICE_ID_HTTP_ONLY_COOKIE", true),
                fingerprinting_enabled: env_flag("DEVICE_FINGERPRINTING_ENABLED", true),
                fingerprint_cookie_name: env::var("DEVICE_FINGERPRINT_COOKIE_NAME")
                    .unwrap_or_else(|_| "fingerprint".to_string()),
                track_guest_sessions: env_flag("DEVICE_TRACK_GUEST_SESSIONS", false),
                regenerate_lost_devices: env_flag("DEVICE_REGENERATE_LOST", false),
                session_lifetime: env_duration("DEVICE_SESSION_LIFETIME", 2 * 60 * 60),
                cache_enabled_for: env_list(
                    "DEVICE_CACHE_ENABLED_FOR",
                    &["device", "session", "location", "user_devices"],
                ),
                device_cache_ttl: env_duration("DEVICE_CACHE_TTL", 60 * 60),
                session_cache_ttl: env_duration("SESSION_CACHE_TTL", 60 * 60),
                location_cache_ttl: env_duration("LOCATION_CACHE_TTL", 24 * 60 * 60),
                user_devices_cache_ttl: env_duration("USER_DEVICES_CACHE_TTL", 60 * 60),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.ssl_mode
        )
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

impl DevicesConfig {
    pub fn cache_enabled(&self, kind: &str) -> bool {
        self.cache_enabled_for.iter().any(|k| k == kind)
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_secs),
    )
}

fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(value) => value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}
