//! In-process implementation of [`RemoteBackend`].
//!
//! Mirrors the Redis semantics the cache relies on: per-key expiry, sorted sets
//! ordered by `(score, member)`, inclusive ranges with negative indices, and an
//! incremental `SCAN`. It also exposes switches to simulate an outage or a slow
//! server, and counts every command so tests can assert round-trips.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{MemoryInfo, RemoteBackend, RemoteError, SortedSetMember};
use crate::cache::pattern::GlobPattern;

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
    /// Insertion order, used as the SCAN cursor so deletions mid-scan skip nothing.
    seq: u64,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn approx_size(&self) -> u64 {
        match &self.value {
            StoredValue::Bytes(b) => b.len() as u64,
            StoredValue::Sorted(m) => m.keys().map(|k| k.len() as u64 + 8).sum(),
        }
    }
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// In-memory remote store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, StoredEntry>>,
    published: Mutex<Vec<(String, String)>>,
    offline: AtomicBool,
    connected: AtomicBool,
    latency_ms: AtomicU64,
    next_seq: AtomicU64,
    commands: AtomicU64,
    connects: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the server going away (`false`) or coming back (`true`).
    ///
    /// Going offline also drops the current connection, so a later
    /// [`connect`](RemoteBackend::connect) is needed once back online.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
        if !online {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Delays every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of commands issued (connect attempts excluded).
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn reset_command_count(&self) {
        self.commands.store(0, Ordering::SeqCst);
    }

    /// Number of connect attempts, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Remaining time-to-live of a raw (namespaced) key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let data = self.data.lock();
        data.get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Raw (namespaced) keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let data = self.data.lock();
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Messages published so far, as `(channel, message)`.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn begin(&self) -> Result<(), RemoteError> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Connection("connection refused".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::NotConnected);
        }
        Ok(())
    }

    /// Runs `f` against live (non-expired) data.
    fn with_data<R>(&self, f: impl FnOnce(&mut HashMap<String, StoredEntry>) -> R) -> R {
        let now = Instant::now();
        let mut data = self.data.lock();
        data.retain(|_, e| !e.is_expired(now));
        f(&mut data)
    }

    fn sorted_members(
        data: &HashMap<String, StoredEntry>,
        key: &str,
    ) -> Result<Vec<(String, f64)>, RemoteError> {
        match data.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::Bytes(_)) => Err(RemoteError::Command(WRONGTYPE.into())),
            Some(StoredValue::Sorted(members)) => {
                let mut sorted: Vec<(String, f64)> =
                    members.iter().map(|(m, s)| (m.clone(), *s)).collect();
                sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                Ok(sorted)
            }
        }
    }
}

/// Resolves a Redis-style inclusive range against a collection of `len` items.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn connect(&self) -> Result<(), RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Connection("connection refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.begin().await?;
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(StoredValue::Bytes(b)) => Ok(Some(b.clone())),
            Some(StoredValue::Sorted(_)) => Err(RemoteError::Command(WRONGTYPE.into())),
        })
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), RemoteError> {
        self.begin().await?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs.max(1));
        self.with_data(|data| {
            let seq = data.get(key).map_or_else(|| self.next_seq(), |e| e.seq);
            data.insert(
                key.to_string(),
                StoredEntry {
                    value: StoredValue::Bytes(value.to_vec()),
                    expires_at: Some(expires_at),
                    seq,
                },
            );
        });
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, RemoteError> {
        self.begin().await?;
        Ok(self.with_data(|data| keys.iter().filter(|k| data.remove(*k).is_some()).count() as u64))
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        self.begin().await?;
        Ok(self.with_data(|data| data.contains_key(key)))
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), RemoteError> {
        self.begin().await?;
        let glob = GlobPattern::new(pattern)
            .ok_or_else(|| RemoteError::Command(format!("invalid pattern: {pattern}")))?;

        Ok(self.with_data(|data| {
            let mut remaining: Vec<(u64, &String)> = data
                .iter()
                .filter(|(_, e)| e.seq >= cursor)
                .map(|(k, e)| (e.seq, k))
                .collect();
            remaining.sort_unstable_by_key(|(seq, _)| *seq);

            let take = count.max(1).min(remaining.len());
            let next = if take < remaining.len() {
                remaining[take].0
            } else {
                0
            };
            let batch = remaining[..take]
                .iter()
                .filter(|(_, k)| glob.matches(k))
                .map(|(_, k)| (*k).clone())
                .collect();
            (next, batch)
        }))
    }

    async fn zadd(&self, key: &str, members: &[SortedSetMember]) -> Result<u64, RemoteError> {
        self.begin().await?;
        self.with_data(|data| {
            let entry = data.entry(key.to_string()).or_insert_with(|| StoredEntry {
                value: StoredValue::Sorted(HashMap::new()),
                expires_at: None,
                seq: self.next_seq(),
            });
            let StoredValue::Sorted(set) = &mut entry.value else {
                return Err(RemoteError::Command(WRONGTYPE.into()));
            };
            let mut added = 0;
            for member in members {
                if set.insert(member.value.clone(), member.score).is_none() {
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .zrange_with_scores(key, start, stop)
            .await?
            .into_iter()
            .map(|m| m.value)
            .collect())
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<SortedSetMember>, RemoteError> {
        self.begin().await?;
        self.with_data(|data| {
            let sorted = Self::sorted_members(data, key)?;
            Ok(match resolve_range(sorted.len(), start, stop) {
                Some((from, to)) => sorted[from..=to]
                    .iter()
                    .map(|(value, score)| SortedSetMember::new(value.clone(), *score))
                    .collect(),
                None => Vec::new(),
            })
        })
    }

    async fn zcard(&self, key: &str) -> Result<u64, RemoteError> {
        self.begin().await?;
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(StoredValue::Sorted(set)) => Ok(set.len() as u64),
            Some(StoredValue::Bytes(_)) => Err(RemoteError::Command(WRONGTYPE.into())),
        })
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, RemoteError> {
        self.begin().await?;
        self.with_data(|data| {
            let Some(entry) = data.get_mut(key) else {
                return Ok(0);
            };
            let StoredValue::Sorted(set) = &mut entry.value else {
                return Err(RemoteError::Command(WRONGTYPE.into()));
            };
            let removed = members.iter().filter(|m| set.remove(*m).is_some()).count() as u64;
            if set.is_empty() {
                data.remove(key);
            }
            Ok(removed)
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, RemoteError> {
        self.begin().await?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        Ok(self.with_data(|data| match data.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                true
            }
            None => false,
        }))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), RemoteError> {
        self.begin().await?;
        self.published
            .lock()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn memory_info(&self) -> Result<Option<MemoryInfo>, RemoteError> {
        self.begin().await?;
        let used_bytes = self.with_data(|data| {
            data.iter()
                .map(|(k, e)| k.len() as u64 + e.approx_size())
                .sum()
        });
        Ok(Some(MemoryInfo {
            used_bytes,
            max_bytes: None,
        }))
    }
}
