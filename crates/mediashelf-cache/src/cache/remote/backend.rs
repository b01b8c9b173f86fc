//! Transport seam between the remote adapter and a concrete key-value store.
//!
//! Backends are thin: they execute one command and report what happened.
//! Availability tracking, timeouts, key namespacing and error absorption all
//! live in [`RemoteCache`](super::RemoteCache).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A member of a sorted set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortedSetMember {
    /// Opaque record identifier.
    pub value: String,
    pub score: f64,
}

impl SortedSetMember {
    pub fn new(value: impl Into<String>, score: f64) -> Self {
        Self {
            value: value.into(),
            score,
        }
    }
}

/// Best-effort memory usage of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub used_bytes: u64,
    /// `None` when the store has no configured limit.
    pub max_bytes: Option<u64>,
}

/// Errors a backend can report.
///
/// These never leave the adapter; they decide whether availability flips and
/// what gets logged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Refused, reset, or otherwise lost connection.
    #[error("Remote connection error: {0}")]
    Connection(String),

    /// A single command exceeded the command timeout.
    #[error("Remote command timed out: {0}")]
    Timeout(&'static str),

    /// The store rejected a command (wrong type, bad argument, ...).
    #[error("Remote command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No live connection to run the command on.
    #[error("Remote cache not connected")]
    NotConnected,
}

impl RemoteError {
    /// Whether this error means the connection itself is gone.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected)
    }
}

/// A network-attached key-value and sorted-set store.
///
/// Keys passed in are already namespaced. Range indices follow the Redis
/// convention: inclusive, negative values count from the end.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Establishes (or re-establishes) the connection and verifies it.
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Drops the connection. Idempotent.
    async fn disconnect(&self);

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), RemoteError>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, RemoteError>;

    async fn exists(&self, key: &str) -> Result<bool, RemoteError>;

    /// One incremental `SCAN` step. A returned cursor of 0 ends the iteration.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), RemoteError>;

    /// Upserts members by identity. Returns the number of newly added members.
    async fn zadd(&self, key: &str, members: &[SortedSetMember]) -> Result<u64, RemoteError>;

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RemoteError>;

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<SortedSetMember>, RemoteError>;

    async fn zcard(&self, key: &str) -> Result<u64, RemoteError>;

    /// Removes members, returning how many were present.
    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, RemoteError>;

    /// Sets a TTL. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, RemoteError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), RemoteError>;

    /// `Ok(None)` when the store does not expose memory statistics.
    async fn memory_info(&self) -> Result<Option<MemoryInfo>, RemoteError>;
}
