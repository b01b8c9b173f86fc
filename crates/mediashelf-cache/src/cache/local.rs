//! In-process L1 cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheLayer;
use super::pattern::{GlobPattern, ensure_wildcard};
use super::stats::{LayerStats, LayerStatsSnapshot};

/// A cached entry with TTL support.
///
/// The payload is wrapped in `Arc` so hits hand out a reference count, not a copy.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub expires_at: Instant,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Bounded in-memory cache keyed by string.
///
/// Entries are never returned past expiry. When full, inserting a new key
/// first sweeps expired entries, then evicts the entry closest to expiry.
pub struct LocalCache {
    entries: DashMap<String, CachedEntry>,
    max_entries: usize,
    stats: LayerStats,
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            stats: LayerStats::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.stats.record_hit();
                return Some(Arc::clone(&entry.data));
            }
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
        }
        self.stats.record_miss();
        None
    }

    pub fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries.insert(key.to_string(), CachedEntry::new(data, ttl));
        self.stats.record_set();
    }

    /// Returns `true` if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.stats.record_delete();
                !entry.is_expired()
            }
            None => false,
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    /// Removes every key matching the glob (a trailing `*` is implied).
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let Some(glob) = GlobPattern::new(&ensure_wildcard(pattern)) else {
            tracing::warn!(pattern = %pattern, "invalid L1 invalidation pattern");
            return 0;
        };

        let mut removed = 0;
        self.entries.retain(|key, _| {
            if glob.matches(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.stats.record_delete();
        }
        removed
    }

    /// Removes everything. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Sweeps expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Spawns a background sweep every `interval`.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.cleanup_expired();
                crate::metrics::set_l1_entries(cache.len());
                if removed > 0 {
                    tracing::debug!(removed, "swept expired L1 entries");
                }
            }
        })
    }

    fn make_room(&self) {
        if self.cleanup_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::trace!(key = %key, "evicted L1 entry at capacity");
        }
    }
}

#[async_trait]
impl CacheLayer for LocalCache {
    fn name(&self) -> &'static str {
        "L1"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn get_bytes(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.get(key)
    }

    async fn set_bytes(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        self.set(key, data, ttl);
    }

    async fn delete(&self, key: &str) -> bool {
        LocalCache::delete(self, key)
    }

    async fn exists(&self, key: &str) -> bool {
        LocalCache::exists(self, key)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        LocalCache::invalidate_pattern(self, pattern) as u64
    }

    fn stats(&self) -> LayerStatsSnapshot {
        LocalCache::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let cache = LocalCache::new(10);
        cache.set("k", b"v".to_vec(), Duration::from_secs(60));

        assert_eq!(cache.get("k"), Some(Arc::new(b"v".to_vec())));
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = LocalCache::new(10);
        cache.set("k", b"v".to_vec(), Duration::from_millis(20));
        assert!(cache.exists("k"));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!cache.exists("k"));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_reports_removal() {
        let cache = LocalCache::new(10);
        cache.set("k", b"v".to_vec(), Duration::from_secs(60));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
    }

    #[test]
    fn test_capacity_evicts_soonest_expiring() {
        let cache = LocalCache::new(2);
        cache.set("short", b"1".to_vec(), Duration::from_secs(5));
        cache.set("long", b"2".to_vec(), Duration::from_secs(500));
        cache.set("new", b"3".to_vec(), Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert!(!cache.exists("short"));
        assert!(cache.exists("long"));
        assert!(cache.exists("new"));
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = LocalCache::new(2);
        cache.set("a", b"1".to_vec(), Duration::from_secs(5));
        cache.set("b", b"2".to_vec(), Duration::from_secs(500));
        cache.set("a", b"3".to_vec(), Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(Arc::new(b"3".to_vec())));
    }

    #[test]
    fn test_invalidate_pattern() {
        let cache = LocalCache::new(100);
        for i in 0..3 {
            cache.set(&format!("count:series:{i}"), vec![], Duration::from_secs(60));
        }
        cache.set("count:files:1", vec![], Duration::from_secs(60));

        assert_eq!(cache.invalidate_pattern("count:series:"), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_pattern("count:series:"), 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = LocalCache::new(10);
        for i in 0..3 {
            cache.set(&format!("k{i}"), vec![], Duration::from_millis(10));
        }
        cache.set("keep", vec![], Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.cleanup_expired(), 3);
        assert_eq!(cache.len(), 1);
    }
}
