//! Unified cache façade over L1 and L2.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CacheLayer;
use super::local::LocalCache;
use super::pubsub::{InvalidationMessage, InvalidationTarget};
use super::remote::{MemoryInfo, RemoteCache, SortedSetMember};
use super::stats::{AggregatedCacheStats, CacheHealth, hit_rate};
use crate::config::CacheConfig;

/// Read policy for [`CacheFacade::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    pub skip_l1: bool,
    pub skip_l2: bool,
    /// Copy an L2 hit into L1 with the backfill TTL.
    pub backfill_l1: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            skip_l1: false,
            skip_l2: false,
            backfill_l1: true,
        }
    }
}

impl GetOptions {
    pub fn remote_only() -> Self {
        Self {
            skip_l1: true,
            ..Self::default()
        }
    }

    pub fn local_only() -> Self {
        Self {
            skip_l2: true,
            ..Self::default()
        }
    }
}

/// Write policy for [`CacheFacade::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub l1_only: bool,
    pub l2_only: bool,
}

impl SetOptions {
    pub fn l1_only() -> Self {
        Self {
            l1_only: true,
            l2_only: false,
        }
    }

    pub fn l2_only() -> Self {
        Self {
            l1_only: false,
            l2_only: true,
        }
    }
}

/// Cache-aside façade combining [`LocalCache`] and [`RemoteCache`].
///
/// ## Lookup Order
///
/// 1. L1, unless skipped. A hit returns without touching L2.
/// 2. L2, unless skipped or unavailable. A hit is backfilled into L1 with a
///    fixed short TTL, independent of the value's original TTL.
/// 3. Miss.
///
/// ## Write Strategy
///
/// L1 is written synchronously, L2 in a detached task. An L2 failure is
/// logged and never reaches the caller.
///
/// Cheap to clone; clones share both layers and the statistics.
#[derive(Clone)]
pub struct CacheFacade {
    inner: Arc<FacadeInner>,
}

struct FacadeInner {
    local: Arc<LocalCache>,
    remote: RemoteCache,
    backfill_ttl: Duration,
    default_ttl_secs: u64,
    instance_id: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheFacade {
    pub fn new(local: Arc<LocalCache>, remote: RemoteCache, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(FacadeInner {
                local,
                remote,
                backfill_ttl: Duration::from_secs(config.backfill_ttl_secs),
                default_ttl_secs: config.default_ttl_secs,
                instance_id: new_instance_id(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Local-only façade, as used when Redis is disabled.
    pub fn local_only(config: &CacheConfig) -> Self {
        Self::new(
            Arc::new(LocalCache::new(config.local_max_entries)),
            RemoteCache::disabled(),
            config,
        )
    }

    pub fn local(&self) -> &Arc<LocalCache> {
        &self.inner.local
    }

    pub fn remote(&self) -> &RemoteCache {
        &self.inner.remote
    }

    /// Identifies this process on the invalidation channel.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.inner.default_ttl_secs
    }

    fn layers(&self) -> [&dyn CacheLayer; 2] {
        [self.inner.local.as_ref(), &self.inner.remote]
    }

    // =========================================================================
    // Key/value
    // =========================================================================

    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: GetOptions) -> Option<T> {
        if !options.skip_l1
            && let Some(data) = self.inner.local.get(key)
        {
            match serde_json::from_slice(&data) {
                Ok(value) => {
                    tracing::trace!(key = %key, "cache hit (L1)");
                    self.record_hit("L1");
                    return Some(value);
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "dropping undecodable L1 entry");
                    self.inner.local.delete(key);
                }
            }
        }

        let remote = &self.inner.remote;
        if !options.skip_l2
            && remote.is_available()
            && let Some(data) = remote.get_raw(key).await
        {
            match serde_json::from_slice(&data) {
                Ok(value) => {
                    tracing::trace!(key = %key, "cache hit (L2)");
                    if options.backfill_l1 {
                        self.inner.local.set(key, data, self.inner.backfill_ttl);
                    }
                    self.record_hit("L2");
                    return Some(value);
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "failed to decode L2 value");
                }
            }
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_miss();
        None
    }

    /// Writes `value` to L1 now and to L2 in the background.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
        options: SetOptions,
    ) {
        let data = match serde_json::to_vec(value) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize cache value");
                return;
            }
        };

        let ttl = Duration::from_secs(ttl_secs);
        let write_l1 = !options.l2_only;
        let write_l2 = !options.l1_only && self.inner.remote.is_available();
        match (write_l1, write_l2) {
            (true, true) => {
                self.inner.local.set(key, data.clone(), ttl);
                crate::metrics::record_cache_set("L1");
                self.spawn_remote_set(key, data, ttl_secs);
            }
            (true, false) => {
                self.inner.local.set(key, data, ttl);
                crate::metrics::record_cache_set("L1");
            }
            (false, true) => self.spawn_remote_set(key, data, ttl_secs),
            (false, false) => {}
        }
    }

    /// Awaited L2-only write. Returns whether L2 acknowledged it.
    ///
    /// For small markers other readers must observe immediately.
    pub async fn set_remote<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> bool {
        self.inner.remote.set(key, value, ttl_secs).await
    }

    /// Awaited L2-only delete, without an invalidation broadcast.
    pub async fn delete_remote(&self, key: &str) -> bool {
        self.inner.remote.delete(key).await
    }

    /// Deletes from both layers. Returns `true` if either removed the key.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        for layer in self.layers() {
            if layer.is_available() {
                removed |= layer.delete(key).await;
            }
        }
        self.publish_invalidation(InvalidationTarget::Key(key.to_string()));
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        if self.inner.local.exists(key) {
            return true;
        }
        self.inner.remote.is_available() && self.inner.remote.exists(key).await
    }

    /// Removes matching keys from both layers. Returns the combined count.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let mut removed = 0;
        for layer in self.layers() {
            if layer.is_available() {
                removed += layer.invalidate_pattern(pattern).await;
            }
        }
        if removed > 0 {
            tracing::info!(pattern = %pattern, removed, "invalidated cache keys");
        }
        self.publish_invalidation(InvalidationTarget::Pattern(pattern.to_string()));
        removed
    }

    /// Clears L1 and every L2 key in this cache's namespace.
    pub async fn invalidate_all(&self) -> u64 {
        let mut removed = self.inner.local.clear() as u64;
        if self.inner.remote.is_available() {
            removed += self.inner.remote.invalidate_pattern("*").await;
        }
        tracing::info!(removed, "cleared cache");
        self.publish_invalidation(InvalidationTarget::All);
        removed
    }

    /// Cache-aside: returns the cached value or computes, caches and returns it.
    ///
    /// The cache write is not awaited. Concurrent misses on the same key each
    /// compute; use [`QueryCache`](super::QueryCache) to coalesce them.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl_secs: u64,
        options: GetOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key, options).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, &value, ttl_secs, SetOptions::default());
        Ok(value)
    }

    // =========================================================================
    // Sorted sets (L2 only)
    // =========================================================================

    pub async fn z_add(&self, key: &str, members: &[SortedSetMember]) -> u64 {
        self.inner.remote.z_add(key, members).await
    }

    pub async fn z_range(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        self.inner.remote.z_range(key, start, stop).await
    }

    pub async fn z_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Vec<SortedSetMember> {
        self.inner.remote.z_range_with_scores(key, start, stop).await
    }

    pub async fn z_card(&self, key: &str) -> u64 {
        self.inner.remote.z_card(key).await
    }

    pub async fn z_remove(&self, key: &str, members: &[String]) -> u64 {
        self.inner.remote.z_remove(key, members).await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.inner.remote.expire(key, ttl_secs).await
    }

    /// Whether `key` exists in L2. L1 is not consulted.
    pub async fn z_exists(&self, key: &str) -> bool {
        self.inner.remote.exists(key).await
    }

    // =========================================================================
    // Health & stats
    // =========================================================================

    pub fn is_remote_available(&self) -> bool {
        self.inner.remote.is_available()
    }

    pub fn get_health(&self) -> CacheHealth {
        CacheHealth::from_availability(
            CacheLayer::is_available(self.inner.local.as_ref()),
            self.inner.remote.is_available(),
        )
    }

    pub fn get_stats(&self) -> AggregatedCacheStats {
        let total_hits = self.inner.hits.load(Ordering::Relaxed);
        let total_misses = self.inner.misses.load(Ordering::Relaxed);
        AggregatedCacheStats {
            l1: self.inner.local.stats(),
            l2: self.inner.remote.stats(),
            l1_entries: self.inner.local.len(),
            total_hits,
            total_misses,
            hit_rate: hit_rate(total_hits, total_misses),
        }
    }

    pub fn reset_stats(&self) {
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        self.inner.local.reset_stats();
        self.inner.remote.reset_stats();
    }

    pub async fn remote_memory_info(&self) -> Option<MemoryInfo> {
        self.inner.remote.memory_info().await
    }

    fn record_hit(&self, layer: &'static str) {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_hit(layer);
    }

    fn spawn_remote_set(&self, key: &str, data: Vec<u8>, ttl_secs: u64) {
        let remote = self.inner.remote.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if remote.set_raw(&key, &data, ttl_secs).await {
                crate::metrics::record_cache_set("L2");
                tracing::trace!(key = %key, ttl_secs, "cache set (L2)");
            } else {
                tracing::debug!(key = %key, "L2 write skipped");
            }
        });
    }

    fn publish_invalidation(&self, target: InvalidationTarget) {
        let remote = &self.inner.remote;
        if !remote.is_available() {
            return;
        }
        let remote = remote.clone();
        let channel = remote.invalidation_channel();
        let message = InvalidationMessage::new(self.inner.instance_id.clone(), target).encode();
        tokio::spawn(async move {
            if !remote.publish(&channel, &message).await {
                tracing::debug!(channel = %channel, "failed to publish cache invalidation");
            }
        });
    }
}

fn new_instance_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!(
        "{}-{:x}-{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::backend::RemoteBackend;
    use crate::cache::remote::MemoryBackend;
    use crate::cache::stats::HealthStatus;
    use crate::config::RedisConfig;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Series {
        id: String,
        name: String,
        tags: Vec<String>,
        year: Option<i32>,
    }

    fn sample() -> Series {
        Series {
            id: "s1".into(),
            name: "Dune".into(),
            tags: vec!["scifi".into()],
            year: None,
        }
    }

    async fn two_tier() -> (CacheFacade, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let remote = RemoteCache::new(
            backend.clone(),
            &RedisConfig {
                enabled: true,
                key_prefix: "t:".into(),
                ..RedisConfig::default()
            },
        );
        assert!(remote.connect().await);
        let facade = CacheFacade::new(Arc::new(LocalCache::new(100)), remote, &CacheConfig::default());
        (facade, backend)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_local_only_round_trip() {
        let facade = CacheFacade::local_only(&CacheConfig::default());
        facade.set("series:s1", &sample(), 60, SetOptions::default());

        let cached: Option<Series> = facade.get("series:s1", GetOptions::default()).await;
        assert_eq!(cached, Some(sample()));
        assert_eq!(facade.get_health().status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_set_writes_l2_in_background() {
        let (facade, backend) = two_tier().await;
        facade.set("k", &sample(), 60, SetOptions::default());
        settle().await;

        assert!(backend.keys().contains(&"t:k".to_string()));
        assert!(facade.local().exists("k"));
    }

    #[tokio::test]
    async fn test_set_options_select_layers() {
        let (facade, backend) = two_tier().await;
        facade.set("l1", &1, 60, SetOptions::l1_only());
        facade.set("l2", &2, 60, SetOptions::l2_only());
        settle().await;

        assert!(facade.local().exists("l1"));
        assert!(!facade.local().exists("l2"));
        assert_eq!(backend.keys(), vec!["t:l2".to_string()]);
    }

    #[tokio::test]
    async fn test_l2_hit_backfills_l1() {
        let (facade, backend) = two_tier().await;
        facade.set("k", &sample(), 600, SetOptions::l2_only());
        settle().await;

        backend.reset_command_count();
        let first: Option<Series> = facade.get("k", GetOptions::default()).await;
        assert_eq!(first, Some(sample()));
        assert_eq!(backend.command_count(), 1);

        let second: Option<Series> = facade.get("k", GetOptions::default()).await;
        assert_eq!(second, Some(sample()));
        assert_eq!(backend.command_count(), 1);
    }

    #[tokio::test]
    async fn test_no_backfill_when_disabled() {
        let (facade, _) = two_tier().await;
        facade.set("k", &1, 600, SetOptions::l2_only());
        settle().await;

        let options = GetOptions {
            backfill_l1: false,
            ..GetOptions::default()
        };
        assert_eq!(facade.get::<i32>("k", options).await, Some(1));
        assert!(!facade.local().exists("k"));
    }

    #[tokio::test]
    async fn test_delete_removes_both_layers_and_publishes() {
        let (facade, backend) = two_tier().await;
        facade.set("k", &1, 60, SetOptions::default());
        settle().await;

        assert!(facade.delete("k").await);
        assert!(!facade.exists("k").await);
        assert!(!facade.delete("k").await);
        settle().await;

        let published = backend.published();
        assert!(!published.is_empty());
        assert_eq!(published[0].0, "t:cache:invalidate");
        let message = InvalidationMessage::decode(&published[0].1).unwrap();
        assert_eq!(message.origin, facade.instance_id());
        assert_eq!(message.target, InvalidationTarget::Key("k".into()));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_sums_layers() {
        let (facade, _) = two_tier().await;
        for i in 0..3 {
            facade.set(&format!("count:series:{i}"), &i, 60, SetOptions::default());
        }
        facade.set("count:files:0", &0, 60, SetOptions::default());
        settle().await;

        assert_eq!(facade.invalidate_pattern("count:series:").await, 6);
        assert!(facade.exists("count:files:0").await);
    }

    #[tokio::test]
    async fn test_invalidate_all_stays_in_namespace() {
        let (facade, backend) = two_tier().await;
        facade.set("a", &1, 60, SetOptions::default());
        backend.set_ex("foreign:key", b"1", 60).await.unwrap();
        settle().await;

        assert_eq!(facade.invalidate_all().await, 2);
        assert!(facade.local().is_empty());
        assert_eq!(backend.keys(), vec!["foreign:key".to_string()]);
    }

    #[tokio::test]
    async fn test_get_or_compute() {
        let facade = CacheFacade::local_only(&CacheConfig::default());
        let calls = AtomicU64::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(sample())
        };

        let first = facade
            .get_or_compute("k", compute, 60, GetOptions::default())
            .await
            .unwrap();
        let second = facade
            .get_or_compute("k", compute, 60, GetOptions::default())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_propagates_error() {
        let facade = CacheFacade::local_only(&CacheConfig::default());
        let result: Result<Series, String> = facade
            .get_or_compute("k", || async { Err("db down".to_string()) }, 60, GetOptions::default())
            .await;
        assert_eq!(result.unwrap_err(), "db down");
        assert!(!facade.exists("k").await);
    }

    #[tokio::test]
    async fn test_stats_count_facade_lookups() {
        let (facade, _) = two_tier().await;
        facade.set("hit", &1, 60, SetOptions::default());
        facade.reset_stats();

        for _ in 0..3 {
            let _: Option<i32> = facade.get("hit", GetOptions::default()).await;
        }
        let _: Option<i32> = facade.get("miss", GetOptions::default()).await;

        let stats = facade.get_stats();
        assert_eq!(stats.total_hits, 3);
        assert_eq!(stats.total_misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < 1e-9);
        assert_eq!(stats.l1_entries, 1);

        facade.reset_stats();
        let stats = facade.get_stats();
        assert_eq!(stats.total_hits + stats.total_misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }
}
