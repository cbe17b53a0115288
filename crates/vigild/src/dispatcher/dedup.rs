//! Job-key deduplication so replayed events do not send twice

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use vigil_shared::JobKey;

/// LRU-based set of recently seen job keys with TTL
pub struct DedupStore {
    cache: Mutex<LruCache<JobKey, Instant>>,
    ttl: Duration,
}

impl DedupStore {
    /// * `capacity` - Maximum number of keys to track
    /// * `ttl` - How long a key suppresses duplicates
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns `true` if the key was seen within the TTL, otherwise records
    /// it and returns `false`
    pub fn check_and_insert(&self, key: &JobKey) -> bool {
        let Ok(mut cache) = self.cache.lock() else {
            return false;
        };
        let now = Instant::now();

        if let Some(inserted_at) = cache.get(key) {
            if now.duration_since(*inserted_at) < self.ttl {
                return true;
            }
            cache.pop(key);
        }

        cache.put(key.clone(), now);
        false
    }

    /// Prune expired entries (called periodically)
    pub fn prune_expired(&self) -> usize {
        let Ok(mut cache) = self.cache.lock() else {
            return 0;
        };
        let now = Instant::now();

        let expired: Vec<JobKey> = cache
            .iter()
            .filter(|(_, inserted_at)| now.duration_since(**inserted_at) >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
