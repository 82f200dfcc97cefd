use std::time::{Duration, Instant};

use dashmap::DashMap;
use rebac_core::engine::{CacheError, KeyValueCache};

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Key-value cache with per-key expiry, shared across tasks without a
/// global lock. Expired keys are dropped lazily on read and by
/// `purge_expired`.
#[derive(Debug, Default)]
pub struct InMemoryKvCache {
    entries: DashMap<String, CachedValue>,
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueCache for InMemoryKvCache {
    async fn get_key(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, v| v.is_expired(now));
        }
        Ok(value)
    }

    async fn set_key(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            CachedValue {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
