use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::CacheStore;
use crate::error::AppResult;

/// TTL-aware in-memory cache store used by the tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut entries = self.entries.lock().expect("cache map poisoned");
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.entries
            .lock()
            .expect("cache map poisoned")
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn forget(&self, key: &str) -> AppResult<()> {
        self.entries.lock().expect("cache map poisoned").remove(key);
        Ok(())
    }

    async fn flush_prefix(&self, prefix: &str) -> AppResult<()> {
        let needle = format!("{}:", prefix);
        self.entries
            .lock()
            .expect("cache map poisoned")
            .retain(|key, _| !key.starts_with(&needle));
        Ok(())
    }
}
