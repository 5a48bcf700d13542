//! Match cache: region key → previously resolved identity label.
//!
//! Keys are exact bounding boxes, so the cache only hits when a face's
//! detection is pixel-identical across frames. With a still subject and a
//! stable detector that saves an embedding pass per frame; a moving face
//! will almost always miss.
//!
//! By default the cache is unbounded and entries never expire, so a label
//! stays valid for a key until the owning session clears it. `with_limits`
//! opts into LRU eviction and age-based expiry, both of which change that
//! behaviour.

use crate::types::RegionKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    label: String,
    created_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
pub struct MatchCache {
    entries: HashMap<RegionKey, CacheEntry>,
    capacity: Option<usize>,
    ttl: Option<Duration>,
    tick: u64,
}

impl MatchCache {
    /// Unbounded, non-expiring cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` entries (least recently used evicted
    /// first) whose entries expire `ttl` after insertion.
    pub fn with_limits(capacity: Option<usize>, ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.map(|c| c.max(1)),
            ttl,
            ..Self::default()
        }
    }

    pub fn lookup(&mut self, key: &RegionKey) -> Option<String> {
        self.tick += 1;
        let tick = self.tick;

        let expired = match (self.entries.get(key), self.ttl) {
            (Some(entry), Some(ttl)) => entry.created_at.elapsed() >= ttl,
            _ => false,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.label.clone())
    }

    pub fn insert(&mut self, key: RegionKey, label: impl Into<String>) {
        self.tick += 1;
        if let Some(capacity) = self.capacity {
            if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
                self.evict_lru();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                label: label.into(),
                created_at: Instant::now(),
                last_used: self.tick,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.tick = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            tracing::trace!(?key, "match cache: evicting least recently used entry");
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: u32) -> RegionKey {
        RegionKey { x, y: 0, width: 10, height: 10 }
    }

    #[test]
    fn test_lookup_miss_then_hit() {
        let mut cache = MatchCache::new();
        assert_eq!(cache.lookup(&key(1)), None);
        cache.insert(key(1), "alice");
        assert_eq!(cache.lookup(&key(1)).as_deref(), Some("alice"));
    }

    #[test]
    fn test_key_must_match_exactly() {
        let mut cache = MatchCache::new();
        cache.insert(key(1), "alice");
        assert_eq!(cache.lookup(&key(2)), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut cache = MatchCache::new();
        cache.insert(key(1), "alice");
        cache.insert(key(1), "bob");
        assert_eq!(cache.lookup(&key(1)).as_deref(), Some("bob"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_empties() {
        let mut cache = MatchCache::new();
        cache.insert(key(1), "alice");
        cache.insert(key(2), "Unknown");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&key(1)), None);
    }

    #[test]
    fn test_default_cache_is_unbounded() {
        let mut cache = MatchCache::new();
        for i in 0..10_000 {
            cache.insert(key(i), "x");
        }
        assert_eq!(cache.len(), 10_000);
        assert_eq!(cache.lookup(&key(0)).as_deref(), Some("x"));
    }

    // Deviation from the unbounded default: capacity-limited LRU eviction.
    #[test]
    fn test_bounded_cache_evicts_least_recently_used() {
        let mut cache = MatchCache::with_limits(Some(2), None);
        cache.insert(key(1), "a");
        cache.insert(key(2), "b");
        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.lookup(&key(1)).is_some());
        cache.insert(key(3), "c");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&key(2)), None);
        assert_eq!(cache.lookup(&key(1)).as_deref(), Some("a"));
        assert_eq!(cache.lookup(&key(3)).as_deref(), Some("c"));
    }

    #[test]
    fn test_bounded_cache_overwrite_does_not_evict() {
        let mut cache = MatchCache::with_limits(Some(2), None);
        cache.insert(key(1), "a");
        cache.insert(key(2), "b");
        cache.insert(key(2), "b2");
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&key(1)).is_some());
    }

    // Deviation from the never-expiring default: age-based expiry.
    #[test]
    fn test_expired_entry_is_dropped() {
        let mut cache = MatchCache::with_limits(None, Some(Duration::ZERO));
        cache.insert(key(1), "alice");
        assert_eq!(cache.lookup(&key(1)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unexpired_entry_survives() {
        let mut cache = MatchCache::with_limits(None, Some(Duration::from_secs(3600)));
        cache.insert(key(1), "alice");
        assert_eq!(cache.lookup(&key(1)).as_deref(), Some("alice"));
    }
}
