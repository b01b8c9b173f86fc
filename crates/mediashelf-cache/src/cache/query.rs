//! Query, count and metadata result caches.
//!
//! Results are cached under deterministic keys derived from the query
//! parameters, and concurrent misses on the same key are coalesced into one
//! fetch against the source of truth.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use mediashelf_config::SharedFlags;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use super::coalesce::{QueryCoalescer, QueryError};
use super::facade::{CacheFacade, GetOptions, SetOptions};
use crate::config::CacheConfig;

pub const QUERY_NAMESPACE: &str = "query";
pub const COUNT_NAMESPACE: &str = "count";
pub const METADATA_NAMESPACE: &str = "metadata";

/// Hex characters of the SHA-256 digest kept in a cache key.
const HASH_PREFIX_LEN: usize = 16;

/// Query parameters used to derive a cache key.
///
/// Entries are kept sorted by name, so insertion order never affects the key.
/// Absent (`None`) values are not recorded; an explicit JSON `null` is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryParams {
    params: BTreeMap<String, serde_json::Value>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter. Values that cannot be represented as JSON are skipped.
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a parameter only if `value` is `Some`.
    pub fn with_opt<V: Serialize>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.insert(name, value);
        }
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Serialize) {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.params.insert(name, sorted(&value));
            }
            Err(e) => {
                tracing::debug!(param = %name, error = %e, "skipping unserializable query parameter");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Canonical JSON: object keys sorted at every nesting level.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.params).unwrap_or_default()
    }

    fn hash_prefix(&self) -> String {
        let digest = Sha256::digest(self.canonical().as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(HASH_PREFIX_LEN);
        hex
    }
}

/// Copy of `value` with object keys inserted in sorted order.
fn sorted(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// `query:{endpoint}:{hash}` for `params`.
pub fn build_query_cache_key(endpoint: &str, params: &QueryParams) -> String {
    format!("{QUERY_NAMESPACE}:{endpoint}:{}", params.hash_prefix())
}

/// `count:{record_type}:{hash}` for `filter`.
pub fn build_count_cache_key(record_type: &str, filter: &QueryParams) -> String {
    format!("{COUNT_NAMESPACE}:{record_type}:{}", filter.hash_prefix())
}

pub fn build_metadata_cache_key(kind: &str, id: &str) -> String {
    format!("{METADATA_NAMESPACE}:{kind}:{id}")
}

/// Cache for list/search query results.
#[derive(Clone)]
pub struct QueryCache {
    cache: CacheFacade,
    coalescer: Arc<QueryCoalescer>,
    flags: SharedFlags,
    query_ttl_secs: u64,
    query_ttl_bulk_secs: u64,
    metadata_ttl_secs: u64,
}

impl QueryCache {
    pub fn new(
        cache: CacheFacade,
        coalescer: Arc<QueryCoalescer>,
        flags: SharedFlags,
        config: &CacheConfig,
    ) -> Self {
        Self {
            cache,
            coalescer,
            flags,
            query_ttl_secs: config.query_ttl_secs,
            query_ttl_bulk_secs: config.query_ttl_bulk_secs,
            metadata_ttl_secs: config.default_ttl_secs,
        }
    }

    /// TTL for newly cached results, shortened during bulk mutations.
    pub fn current_ttl_secs(&self) -> u64 {
        if self.flags.is_bulk_mutation_in_progress() {
            self.query_ttl_bulk_secs
        } else {
            self.query_ttl_secs
        }
    }

    /// Returns the cached result for `endpoint`/`params`, or runs `fetch`
    /// (coalesced with identical in-flight calls) and caches its result.
    ///
    /// # Errors
    ///
    /// Only `fetch`'s own failure; cache failures count as misses.
    pub async fn get_cached_or_fetch<T, F, Fut>(
        &self,
        endpoint: &str,
        params: &QueryParams,
        fetch: F,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = build_query_cache_key(endpoint, params);
        let ttl_secs = self.current_ttl_secs();
        fetch_through(&self.cache, &self.coalescer, key, ttl_secs, fetch).await
    }

    /// Shares one in-flight computation per key. Does not cache the result.
    pub async fn coalesced_query<T, F, Fut>(&self, key: &str, compute: F) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.coalescer.coalesce(key, compute).await
    }

    /// Drops cached results for one endpoint, or for every endpoint if `None`.
    pub async fn invalidate_query_cache(&self, endpoint: Option<&str>) -> u64 {
        let pattern = match endpoint {
            Some(endpoint) => format!("{QUERY_NAMESPACE}:{endpoint}:"),
            None => format!("{QUERY_NAMESPACE}:"),
        };
        self.cache.invalidate_pattern(&pattern).await
    }

    /// Cached metadata of one entity (`metadata:{kind}:{id}`).
    ///
    /// # Errors
    ///
    /// Only `fetch`'s own failure.
    pub async fn get_cached_metadata<T, F, Fut>(
        &self,
        kind: &str,
        id: &str,
        fetch: F,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = build_metadata_cache_key(kind, id);
        fetch_through(&self.cache, &self.coalescer, key, self.metadata_ttl_secs, fetch).await
    }

    pub async fn invalidate_metadata(&self, kind: &str, id: &str) -> bool {
        self.cache.delete(&build_metadata_cache_key(kind, id)).await
    }
}

/// Cache for record counts under arbitrary filters.
#[derive(Clone)]
pub struct CountCache {
    cache: CacheFacade,
    coalescer: Arc<QueryCoalescer>,
    count_ttl_secs: u64,
}

impl CountCache {
    pub fn new(cache: CacheFacade, coalescer: Arc<QueryCoalescer>, config: &CacheConfig) -> Self {
        Self {
            cache,
            coalescer,
            count_ttl_secs: config.count_ttl_secs,
        }
    }

    /// # Errors
    ///
    /// Only `count`'s own failure.
    pub async fn get_cached_count<F, Fut>(
        &self,
        record_type: &str,
        filter: &QueryParams,
        count: F,
    ) -> Result<u64, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, QueryError>> + Send + 'static,
    {
        let key = build_count_cache_key(record_type, filter);
        fetch_through(&self.cache, &self.coalescer, key, self.count_ttl_secs, count).await
    }

    /// Drops every cached count for `record_type`, whatever the filter.
    pub async fn invalidate_counts(&self, record_type: &str) -> u64 {
        self.cache
            .invalidate_pattern(&format!("{COUNT_NAMESPACE}:{record_type}:"))
            .await
    }
}

/// Cache-aside through the coalescer. The winning computation writes the
/// cache once; joiners only await it.
async fn fetch_through<T, F, Fut>(
    cache: &CacheFacade,
    coalescer: &QueryCoalescer,
    key: String,
    ttl_secs: u64,
    fetch: F,
) -> Result<T, QueryError>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    if let Some(value) = cache.get(&key, GetOptions::default()).await {
        return Ok(value);
    }

    let writer = cache.clone();
    let write_key = key.clone();
    coalescer
        .coalesce(&key, move || {
            let fut = fetch();
            async move {
                let value = fut.await?;
                writer.set(&write_key, &value, ttl_secs, SetOptions::default());
                Ok(value)
            }
        })
        .await
}
