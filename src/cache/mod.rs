use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::AppResult;

#[cfg(test)]
pub mod memory;

pub const DEVICE_PREFIX: &str = "device";
pub const SESSION_PREFIX: &str = "session";
pub const LOCATION_PREFIX: &str = "location";
pub const USER_DEVICES_PREFIX: &str = "user_devices";

/// Injected key-value backend with TTL semantics. Redis in production; an
/// in-memory store backs the tests.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
    async fn forget(&self, key: &str) -> AppResult<()>;
    async fn flush_prefix(&self, prefix: &str) -> AppResult<()>;
}

/// Items that know their own cache key (and optionally a TTL override).
pub trait Cacheable: Serialize {
    fn cache_key(&self) -> String;

    fn cache_ttl(&self) -> Option<Duration> {
        None
    }
}

/// Kind-namespaced key: prefix plus a stable hash of the natural lookup
/// value. Prevents cross-kind collisions between identical raw values.
pub fn key(prefix: &str, raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in &digest[..16] {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("{}:{}", prefix, hex)
}

/// Per-entity-kind memoizing facade. Each kind carries its own enable flag
/// and default TTL; a disabled kind bypasses the backend entirely, and a
/// failing backend degrades to pass-through computation — cache trouble
/// never fails the request.
#[derive(Clone)]
pub struct EntityCache {
    store: Arc<dyn CacheStore>,
    prefix: &'static str,
    enabled: bool,
    ttl: Duration,
}

impl EntityCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        prefix: &'static str,
        enabled: bool,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            prefix,
            enabled,
            ttl,
        }
    }

    pub fn key(&self, raw: &str) -> String {
        key(self.prefix, raw)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Cache get failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Corrupt cache entry {}: {}", key, e);
                let _ = self.store.forget(key).await;
                None
            }
        }
    }

    pub async fn put<T: Cacheable + Sync>(&self, item: &T) {
        if !self.enabled {
            return;
        }
        self.put_raw(&item.cache_key(), item, item.cache_ttl().unwrap_or(self.ttl))
            .await;
    }

    pub async fn put_key<T: Serialize + Sync>(&self, key: &str, value: &T) {
        if !self.enabled {
            return;
        }
        self.put_raw(key, value, self.ttl).await;
    }

    pub async fn forget<T: Cacheable + Sync>(&self, item: &T) {
        self.forget_key(&item.cache_key()).await;
    }

    pub async fn forget_key(&self, key: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.store.forget(key).await {
            tracing::warn!("Cache forget failed for {}: {}", key, e);
        }
    }

    /// Read-through memoization. When the kind is disabled the compute
    /// function runs directly — callers must not assume caching occurred.
    pub async fn remember<T, F, Fut>(&self, key: &str, compute: F) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<T>>>,
    {
        if !self.enabled {
            return compute().await;
        }

        if let Some(hit) = self.get(key).await {
            return Ok(Some(hit));
        }

        let computed = compute().await?;
        if let Some(value) = &computed {
            self.put_raw(key, value, self.ttl).await;
        }
        Ok(computed)
    }

    pub async fn flush(&self) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.store.flush_prefix(self.prefix).await {
            tracing::warn!("Cache flush failed for {}: {}", self.prefix, e);
        }
    }

    async fn put_raw<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Cache encode failed for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.put_ex(key, &raw, ttl).await {
            tracing::warn!("Cache put failed for {}: {}", key, e);
        }
    }
}
