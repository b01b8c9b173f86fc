//! Remote (L2) cache adapter.
//!
//! [`RemoteCache`] wraps a [`RemoteBackend`] and never lets a transport
//! failure reach its caller: every public method returns a value or a neutral
//! miss/empty/false result. Connection-level failures flip the adapter to
//! [`ConnectionState::Disconnected`], log once, and start a bounded reconnect
//! loop; anything else is counted and treated as a miss.

pub mod backend;
pub mod memory;
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{MemoryInfo, RemoteBackend, RemoteError, SortedSetMember};
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use super::CacheLayer;
use super::pattern::ensure_wildcard;
use super::stats::{LayerStats, LayerStatsSnapshot};
use crate::config::RedisConfig;

/// Keys requested per `SCAN` step during pattern invalidation.
const SCAN_BATCH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::Connected,
            1 => Self::Connecting,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

/// Linear backoff with a cap: attempt `n` waits `min(n * base, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &RedisConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay(),
            max_delay: config.reconnect_max_delay(),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Cloneable handle to the shared remote adapter.
#[derive(Clone)]
pub struct RemoteCache {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    /// `None` when the remote layer is disabled by configuration.
    backend: Option<Arc<dyn RemoteBackend>>,
    key_prefix: String,
    connect_timeout: Duration,
    command_timeout: Duration,
    policy: ReconnectPolicy,
    state: AtomicU8,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    stats: LayerStats,
}

impl RemoteCache {
    pub fn new(backend: Arc<dyn RemoteBackend>, config: &RedisConfig) -> Self {
        Self::build(Some(backend), config)
    }

    /// Builds a Redis-backed adapter, or a disabled one if `config.enabled` is false.
    pub fn from_config(config: &RedisConfig) -> Self {
        if config.enabled {
            Self::new(Arc::new(RedisBackend::new(config)), config)
        } else {
            Self::disabled()
        }
    }

    /// An adapter with no backend. Always unavailable.
    pub fn disabled() -> Self {
        Self::build(None, &RedisConfig::default())
    }

    fn build(backend: Option<Arc<dyn RemoteBackend>>, config: &RedisConfig) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                backend,
                key_prefix: config.key_prefix.clone(),
                connect_timeout: config.connect_timeout(),
                command_timeout: config.command_timeout(),
                policy: ReconnectPolicy::from_config(config),
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                stats: LayerStats::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_available(&self) -> bool {
        self.is_enabled() && self.state() == ConnectionState::Connected
    }

    pub fn key_prefix(&self) -> &str {
        &self.inner.key_prefix
    }

    /// Channel used to broadcast L1 invalidations to other instances.
    pub fn invalidation_channel(&self) -> String {
        format!("{}cache:invalidate", self.inner.key_prefix)
    }

    /// Connects to the backend. On failure the reconnect loop takes over.
    ///
    /// Returns whether the adapter is connected when the call completes.
    pub async fn connect(&self) -> bool {
        let Some(backend) = &self.inner.backend else {
            return false;
        };
        self.inner.shutdown.store(false, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        match self.inner.try_connect(backend.as_ref()).await {
            Ok(()) => {
                self.inner.set_state(ConnectionState::Connected);
                tracing::info!("remote cache connected");
                true
            }
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                tracing::warn!(error = %e, "remote cache unavailable, running on local cache only");
                self.spawn_reconnect();
                false
            }
        }
    }

    /// Drops the connection and stops automatic reconnection.
    pub async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(backend) = &self.inner.backend {
            backend.disconnect().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("remote cache disconnected");
    }

    // ---------------------------------------------------------------------
    // Key/value
    // ---------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.get_raw(key).await?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                self.inner.stats.record_error();
                tracing::debug!(key = %key, error = %e, "failed to deserialize remote cache value");
                None
            }
        }
    }

    /// Serializes and stores `value`. Returns whether the write was acknowledged.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        if !self.is_available() {
            return false;
        }
        match serde_json::to_vec(value) {
            Ok(data) => self.set_raw(key, &data, ttl_secs).await,
            Err(e) => {
                self.inner.stats.record_error();
                tracing::debug!(key = %key, error = %e, "failed to serialize remote cache value");
                false
            }
        }
    }

    /// Every call counts as exactly one hit, miss or error. An unavailable
    /// remote counts as a miss.
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let Some(backend) = self.available_backend() else {
            self.inner.stats.record_miss();
            return None;
        };
        let key = self.namespaced(key);
        match self.execute("GET", backend.get(&key)).await {
            Ok(Some(data)) => {
                self.inner.stats.record_hit();
                Some(data)
            }
            Ok(None) => {
                self.inner.stats.record_miss();
                None
            }
            Err(_) => None,
        }
    }

    pub async fn set_raw(&self, key: &str, data: &[u8], ttl_secs: u64) -> bool {
        let Some(backend) = self.available_backend() else {
            return false;
        };
        let key = self.namespaced(key);
        let stored = self
            .execute("SET", backend.set_ex(&key, data, ttl_secs))
            .await
            .is_ok();
        if stored {
            self.inner.stats.record_set();
        }
        stored
    }

    /// Returns `true` iff a key was actually removed.
    pub async fn delete(&self, key: &str) -> bool {
        let Some(backend) = self.available_backend() else {
            return false;
        };
        let keys = [self.namespaced(key)];
        match self.execute("DEL", backend.del(&keys)).await {
            Ok(n) if n > 0 => {
                self.inner.stats.record_delete();
                true
            }
            _ => false,
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(backend) = self.available_backend() else {
            return false;
        };
        let key = self.namespaced(key);
        self.execute("EXISTS", backend.exists(&key))
            .await
            .unwrap_or(false)
    }

    /// Deletes every key in this adapter's namespace matching `pattern`.
    ///
    /// Walks the keyspace with `SCAN` rather than `KEYS`. A trailing `*` is
    /// implied. On error the count removed so far is returned.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.available_backend() else {
            return 0;
        };
        let pattern = self.namespaced(&ensure_wildcard(pattern));

        let mut cursor = 0;
        let mut removed = 0;
        loop {
            let (next, keys) = match self
                .execute("SCAN", backend.scan(cursor, &pattern, SCAN_BATCH))
                .await
            {
                Ok(step) => step,
                Err(_) => break,
            };
            if !keys.is_empty() {
                match self.execute("DEL", backend.del(&keys)).await {
                    Ok(n) => removed += n,
                    Err(_) => break,
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if removed > 0 {
            self.inner.stats.record_delete();
        }
        removed
    }

    // ---------------------------------------------------------------------
    // Sorted sets
    // ---------------------------------------------------------------------

    pub async fn z_add(&self, key: &str, members: &[SortedSetMember]) -> u64 {
        if members.is_empty() {
            return 0;
        }
        let Some(backend) = self.available_backend() else {
            return 0;
        };
        let key = self.namespaced(key);
        self.execute("ZADD", backend.zadd(&key, members))
            .await
            .unwrap_or(0)
    }

    pub async fn z_range(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let Some(backend) = self.available_backend() else {
            return Vec::new();
        };
        let key = self.namespaced(key);
        self.execute("ZRANGE", backend.zrange(&key, start, stop))
            .await
            .unwrap_or_default()
    }

    pub async fn z_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Vec<SortedSetMember> {
        let Some(backend) = self.available_backend() else {
            return Vec::new();
        };
        let key = self.namespaced(key);
        self.execute("ZRANGE", backend.zrange_with_scores(&key, start, stop))
            .await
            .unwrap_or_default()
    }

    pub async fn z_card(&self, key: &str) -> u64 {
        let Some(backend) = self.available_backend() else {
            return 0;
        };
        let key = self.namespaced(key);
        self.execute("ZCARD", backend.zcard(&key))
            .await
            .unwrap_or(0)
    }

    pub async fn z_remove(&self, key: &str, members: &[String]) -> u64 {
        if members.is_empty() {
            return 0;
        }
        let Some(backend) = self.available_backend() else {
            return 0;
        };
        let key = self.namespaced(key);
        self.execute("ZREM", backend.zrem(&key, members))
            .await
            .unwrap_or(0)
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        let Some(backend) = self.available_backend() else {
            return false;
        };
        let key = self.namespaced(key);
        self.execute("EXPIRE", backend.expire(&key, ttl_secs))
            .await
            .unwrap_or(false)
    }

    // ---------------------------------------------------------------------
    // Misc
    // ---------------------------------------------------------------------

    /// Publishes on a raw (not namespaced) channel.
    pub async fn publish(&self, channel: &str, message: &str) -> bool {
        let Some(backend) = self.available_backend() else {
            return false;
        };
        self.execute("PUBLISH", backend.publish(channel, message))
            .await
            .is_ok()
    }

    pub async fn memory_info(&self) -> Option<MemoryInfo> {
        let backend = self.available_backend()?;
        self.execute("INFO", backend.memory_info())
            .await
            .ok()
            .flatten()
    }

    pub fn stats(&self) -> LayerStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.inner.key_prefix, key)
    }

    fn available_backend(&self) -> Option<&Arc<dyn RemoteBackend>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.inner.backend.as_ref()
    }

    /// Runs one backend command under the command timeout and records failures.
    async fn execute<T, F>(&self, op: &'static str, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let result = match tokio::time::timeout(self.inner.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(op)),
        };
        if let Err(e) = &result {
            self.record_failure(op, e);
        }
        result
    }

    fn record_failure(&self, op: &'static str, error: &RemoteError) {
        self.inner.stats.record_error();
        crate::metrics::record_cache_error("L2");

        if error.is_connection_level() {
            self.mark_disconnected(error);
        } else {
            tracing::debug!(op, error = %error, "remote cache command failed");
        }
    }

    fn mark_disconnected(&self, error: &RemoteError) {
        let previous = self.inner.swap_state(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            tracing::warn!(
                error = %error,
                "remote cache connection lost, continuing with local cache only"
            );
        }
        self.spawn_reconnect();
    }

    fn spawn_reconnect(&self) {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let Some(backend) = self.inner.backend.clone() else {
            return;
        };
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.reconnect_loop(backend.as_ref()).await;
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

impl RemoteInner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn swap_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst))
    }

    async fn try_connect(&self, backend: &dyn RemoteBackend) -> Result<(), RemoteError> {
        match tokio::time::timeout(self.connect_timeout, backend.connect()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Connection("connect timed out".into())),
        }
    }

    async fn reconnect_loop(&self, backend: &dyn RemoteBackend) {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.delay_for(attempt)).await;

            if self.shutdown.load(Ordering::SeqCst) || self.state() == ConnectionState::Connected
            {
                return;
            }

            self.set_state(ConnectionState::Connecting);
            match self.try_connect(backend).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    crate::metrics::record_remote_reconnect(true);
                    tracing::info!(attempt, "remote cache reconnected");
                    return;
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    crate::metrics::record_remote_reconnect(false);
                    tracing::debug!(attempt, error = %e, "remote cache reconnect attempt failed");
                }
            }
        }

        tracing::error!(
            attempts = self.policy.max_attempts,
            "giving up on remote cache reconnection; call connect() to retry"
        );
    }
}

#[async_trait]
impl CacheLayer for RemoteCache {
    fn name(&self) -> &'static str {
        "L2"
    }

    fn is_available(&self) -> bool {
        RemoteCache::is_available(self)
    }

    async fn get_bytes(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.get_raw(key).await.map(Arc::new)
    }

    async fn set_bytes(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        self.set_raw(key, &data, ttl.as_secs()).await;
    }

    async fn delete(&self, key: &str) -> bool {
        RemoteCache::delete(self, key).await
    }

    async fn exists(&self, key: &str) -> bool {
        RemoteCache::exists(self, key).await
    }

    async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        RemoteCache::invalidate_pattern(self, pattern).await
    }

    fn stats(&self) -> LayerStatsSnapshot {
        RemoteCache::stats(self)
    }
}
