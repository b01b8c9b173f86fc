//! Two-tier caching for the library backend.
//!
//! ## Architecture
//!
//! - **L1 ([`LocalCache`])**: in-process DashMap, microsecond latency, per-instance
//! - **L2 ([`RemoteCache`])**: Redis, millisecond latency, shared across instances
//! - **Pub/Sub**: cross-instance L1 invalidation
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get → L1 (DashMap) → L2 (Redis) → source of truth (caller)
//!           ↑              │
//!           └── backfill ──┘
//! ```
//!
//! On top of the [`CacheFacade`] sit the pagination index engine
//! ([`index`]) and the query/count result caches ([`query`]).
//!
//! ## Graceful Degradation
//!
//! If Redis is disabled or unreachable, every operation keeps working against
//! L1 only. No cache operation returns an error for an unavailable L2.

pub mod coalesce;
pub mod facade;
pub mod index;
pub mod local;
pub mod pattern;
pub mod pubsub;
pub mod query;
pub mod remote;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use coalesce::{QueryCoalescer, QueryError};
pub use facade::{CacheFacade, GetOptions, SetOptions};
pub use index::{SeriesIndexKey, SeriesIndexService, SeriesPage, SortField, SortOrder};
pub use local::{CachedEntry, LocalCache};
pub use pubsub::{InvalidationListener, InvalidationMessage, InvalidationTarget};
pub use query::{
    CountCache, QueryCache, QueryParams, build_count_cache_key, build_metadata_cache_key,
    build_query_cache_key,
};
pub use remote::{
    ConnectionState, MemoryBackend, MemoryInfo, RedisBackend, RemoteBackend, RemoteCache,
    RemoteError, SortedSetMember,
};
pub use stats::{AggregatedCacheStats, CacheHealth, HealthStatus, LayerStatsSnapshot};

/// Operations shared by both cache layers.
///
/// Every method is safe to call while the layer is unavailable and then
/// returns a neutral value (absent, `false`, 0).
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Short label used in logs and metrics ("L1", "L2").
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    async fn get_bytes(&self, key: &str) -> Option<Arc<Vec<u8>>>;

    async fn set_bytes(&self, key: &str, data: Vec<u8>, ttl: Duration);

    /// Returns `true` iff a live entry was removed.
    async fn delete(&self, key: &str) -> bool;

    async fn exists(&self, key: &str) -> bool;

    /// Removes keys matching a glob (a trailing `*` is implied).
    async fn invalidate_pattern(&self, pattern: &str) -> u64;

    fn stats(&self) -> LayerStatsSnapshot;
}
