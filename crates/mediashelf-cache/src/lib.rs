//! Multi-layer caching for the Mediashelf backend.
//!
//! - [`cache::CacheFacade`]: cache-aside over a local L1 and a Redis L2
//! - [`cache::SeriesIndexService`]: sorted-set pagination indices
//! - [`cache::QueryCache`] / [`cache::CountCache`]: result caches with
//!   request coalescing
//!
//! Everything degrades to L1-only when Redis is disabled or unreachable; no
//! cache operation fails because of L2.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod observability;

use std::sync::Arc;
use std::time::Duration;

use mediashelf_config::SharedFlags;
use mediashelf_storage::DynSeriesSource;
use tokio::task::JoinHandle;

pub use cache::{
    CacheFacade, CountCache, GetOptions, QueryCache, QueryCoalescer, QueryError, QueryParams,
    RemoteCache, SeriesIndexKey, SeriesIndexService, SeriesPage, SetOptions, SortField, SortOrder,
};
pub use config::{AppConfig, CacheConfig, LoggingConfig, RedisConfig};
pub use observability::{apply_logging_level, init_tracing, init_tracing_from_config};

/// The assembled cache layer of one process.
pub struct CacheStack {
    pub facade: CacheFacade,
    pub queries: QueryCache,
    pub counts: CountCache,
    pub coalescer: Arc<QueryCoalescer>,
    config: CacheConfig,
    background: Vec<JoinHandle<()>>,
}

impl CacheStack {
    /// Index service over `source`, sharing this stack's façade.
    pub fn series_index(&self, source: DynSeriesSource) -> SeriesIndexService {
        SeriesIndexService::new(self.facade.clone(), source, &self.config)
    }

    /// Stops background tasks and disconnects from Redis.
    pub async fn shutdown(self) {
        for handle in &self.background {
            handle.abort();
        }
        self.facade.remote().disconnect().await;
    }
}

/// Create the cache layer based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: L1 only
/// - **Redis enabled**: L1 + L2. If Redis is unreachable at startup the stack
///   runs on L1 while the adapter keeps reconnecting in the background.
///
/// When Redis is enabled, the cross-instance invalidation listener is started
/// as well. The L1 cleanup task always runs.
pub async fn create_cache(config: &AppConfig, flags: SharedFlags) -> CacheStack {
    let local = Arc::new(cache::LocalCache::new(config.cache.local_max_entries));
    let mut background = vec![local.start_cleanup_task(Duration::from_secs(
        config.cache.local_cleanup_interval_secs.max(1),
    ))];

    let remote = RemoteCache::from_config(&config.redis);
    if config.redis.enabled {
        tracing::info!(url = %config.redis.redacted_url(), "connecting to Redis");
        if remote.connect().await {
            tracing::info!("✓ Connected to Redis successfully");
        } else {
            tracing::warn!("Failed to connect to Redis. Running on local cache until it comes back.");
        }
    } else {
        tracing::info!("Redis disabled, using local cache only");
    }

    let facade = CacheFacade::new(Arc::clone(&local), remote.clone(), &config.cache);

    if config.redis.enabled {
        let listener = cache::InvalidationListener::new(
            config.redis.connection_url(),
            remote.invalidation_channel(),
            facade.instance_id(),
            local,
        );
        background.push(listener.start());
    }

    let coalescer = Arc::new(QueryCoalescer::new());
    let queries = QueryCache::new(facade.clone(), Arc::clone(&coalescer), flags, &config.cache);
    let counts = CountCache::new(facade.clone(), Arc::clone(&coalescer), &config.cache);

    CacheStack {
        facade,
        queries,
        counts,
        coalescer,
        config: config.cache.clone(),
        background,
    }
}
