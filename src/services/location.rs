use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::EntityCache;
use crate::error::AppResult;
use crate::models::Location;

/// Contract for geo resolution. Lookup internals live outside this crate;
/// anything that can turn an ip into a `Location` plugs in here.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn locate(&self, ip: &str) -> AppResult<Location>;
}

/// Records the ip and nothing else. The default when no geo provider is
/// wired in.
#[derive(Debug, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl LocationResolver for PassthroughResolver {
    async fn locate(&self, ip: &str) -> AppResult<Location> {
        Ok(Location::from_ip(ip))
    }
}

/// Memoizes any resolver under the location cache, keyed by ip. Locations
/// are immutable once resolved, so entries only leave by TTL.
pub struct CachedLocationResolver {
    inner: Arc<dyn LocationResolver>,
    cache: EntityCache,
}

impl CachedLocationResolver {
    pub fn new(inner: Arc<dyn LocationResolver>, cache: EntityCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl LocationResolver for CachedLocationResolver {
    async fn locate(&self, ip: &str) -> AppResult<Location> {
        let key = self.cache.key(ip);
        let located = self
            .cache
            .remember(&key, || async { self.inner.locate(ip).await.map(Some) })
            .await?;
        Ok(located.unwrap_or_else(|| Location::from_ip(ip)))
    }
}
