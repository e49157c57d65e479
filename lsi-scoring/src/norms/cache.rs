//! Bounded percentile cache

use super::NormResult;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Content key of one lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormCacheKey {
    /// Group chain and version tokens
    pub chain: String,
    pub scale: String,
    pub raw: i32,
}

struct Entries {
    lru: LruCache<NormCacheKey, NormResult>,
    /// Bumped by every clear
    generation: u64,
}

/// Thread-safe LRU of resolved conversions with hit/miss counters
///
/// Lookups that started before a [`NormCache::clear`] must not repopulate the
/// cache: callers read [`NormCache::generation`] before fetching and store
/// with [`NormCache::put_if_current`].
pub struct NormCache {
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NormCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                generation: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &NormCacheKey) -> Option<NormResult> {
        let found = self.entries.lock().lru.get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, key: NormCacheKey, value: NormResult) {
        self.entries.lock().lru.put(key, value);
    }

    pub fn generation(&self) -> u64 {
        self.entries.lock().generation
    }

    /// Store unless the cache was cleared since `generation` was read
    ///
    /// Returns whether the value was stored.
    pub fn put_if_current(&self, generation: u64, key: NormCacheKey, value: NormResult) -> bool {
        let mut entries = self.entries.lock();
        if entries.generation != generation {
            return false;
        }
        entries.lru.put(key, value);
        true
    }

    /// Drop every entry and start a new generation; counters are kept
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::norms::NormProvenance;

    fn key(raw: i32) -> NormCacheKey {
        NormCacheKey {
            chain: "Total|default".into(),
            scale: "CE".into(),
            raw,
        }
    }

    fn value(p: f64) -> NormResult {
        NormResult {
            percentile: Some(p),
            provenance: NormProvenance::EmpiricalTable,
            truncated: false,
        }
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = NormCache::new(4);
        assert!(cache.get(&key(1)).is_none());
        cache.put(key(1), value(10.0));
        assert_eq!(cache.get(&key(1)), Some(value(10.0)));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = NormCache::new(2);
        cache.put(key(1), value(1.0));
        cache.put(key(2), value(2.0));
        cache.get(&key(1));
        cache.put(key(3), value(3.0));
        assert!(cache.get(&key(2)).is_none());
        assert!(cache.get(&key(1)).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear() {
        let cache = NormCache::new(8);
        cache.put(key(1), value(1.0));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn test_put_after_clear_is_dropped() {
        let cache = NormCache::new(8);
        let before = cache.generation();
        cache.clear();

        assert!(!cache.put_if_current(before, key(1), value(15.0)));
        assert!(cache.is_empty());

        assert!(cache.put_if_current(cache.generation(), key(1), value(18.0)));
        assert_eq!(cache.get(&key(1)), Some(value(18.0)));
    }
}
