//! Sorted-set pagination index for series browsing.
//!
//! Each (scope, sort field, sort order) combination is one L2 sorted set of
//! series IDs scored by [`calculate_score`]. A page read is a rank range plus
//! a cardinality, so deep pages cost the same as the first one.
//!
//! ## Lifecycle
//!
//! ```text
//! absent ──get page / warm──▶ built ──bulk change──▶ dirty ──get page──▶ built
//!                               │
//!                               └── single edit: upsert / remove member in place
//! ```
//!
//! Indices expire on their own after `index_ttl_secs`; dirty markers after
//! `dirty_marker_ttl_secs`. With L2 unavailable every operation degrades to
//! an empty/zero result and callers query the source of truth directly.

pub mod score;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures_util::future::join_all;
use mediashelf_storage::{DynSeriesSource, IndexScope, StorageError};
use serde::Serialize;

pub use score::{SortField, SortOrder, calculate_score, calculate_score_by_name, text_score};

use super::facade::CacheFacade;
use super::remote::SortedSetMember;
use crate::config::CacheConfig;

/// Key prefix shared by every index and dirty marker.
pub const INDEX_NAMESPACE: &str = "series:index:";

/// Identifies one pagination index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesIndexKey {
    pub scope: IndexScope,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl SeriesIndexKey {
    pub fn new(scope: IndexScope, sort_field: SortField, sort_order: SortOrder) -> Self {
        Self {
            scope,
            sort_field,
            sort_order,
        }
    }

    /// Cache key of the sorted set, e.g. `series:index:all:name:asc`.
    pub fn cache_key(&self) -> String {
        format!(
            "{INDEX_NAMESPACE}{}:{}:{}",
            self.scope, self.sort_field, self.sort_order
        )
    }

    pub fn dirty_key(&self) -> String {
        format!("{}:dirty", self.cache_key())
    }

    /// Every field/order combination for `scope`.
    pub fn all_for_scope(scope: &IndexScope) -> Vec<Self> {
        SortField::ALL
            .iter()
            .flat_map(|field| {
                SortOrder::ALL
                    .iter()
                    .map(move |order| Self::new(scope.clone(), *field, *order))
            })
            .collect()
    }
}

impl fmt::Display for SeriesIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// One page of series IDs in index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPage {
    pub ids: Vec<String>,
    /// Members in the whole index, not just this page.
    pub total_count: u64,
    pub offset: u64,
    pub limit: u64,
}

impl SeriesPage {
    pub fn empty(offset: u64, limit: u64) -> Self {
        Self {
            ids: Vec::new(),
            total_count: 0,
            offset,
            limit,
        }
    }
}

/// Builds, reads and maintains series pagination indices.
pub struct SeriesIndexService {
    cache: CacheFacade,
    source: DynSeriesSource,
    index_ttl_secs: u64,
    dirty_marker_ttl_secs: u64,
    /// Serializes rebuilds per index so concurrent cold reads build once.
    build_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SeriesIndexService {
    pub fn new(cache: CacheFacade, source: DynSeriesSource, config: &CacheConfig) -> Self {
        Self {
            cache,
            source,
            index_ttl_secs: config.index_ttl_secs,
            dirty_marker_ttl_secs: config.dirty_marker_ttl_secs,
            build_locks: DashMap::new(),
        }
    }

    /// Whether reads may trust the index: L2 is up, no live dirty marker, and
    /// the set is non-empty.
    pub async fn is_index_warmed(&self, key: &SeriesIndexKey) -> bool {
        if !self.cache.is_remote_available() {
            return false;
        }
        if self.cache.z_exists(&key.dirty_key()).await {
            return false;
        }
        self.cache.z_card(&key.cache_key()).await > 0
    }

    /// Sets the dirty marker so the next read rebuilds.
    pub async fn mark_index_dirty(&self, key: &SeriesIndexKey) -> bool {
        self.cache
            .set_remote(&key.dirty_key(), &true, self.dirty_marker_ttl_secs)
            .await
    }

    /// Rebuilds one index from the source of truth. Returns the member count.
    ///
    /// Members that no longer qualify are removed; the dirty marker is cleared.
    /// An empty scope leaves no sorted set behind.
    ///
    /// Finding stale members reads the whole existing set, so a rebuild moves
    /// every member over the wire twice. The set stays readable throughout.
    ///
    /// # Errors
    ///
    /// Propagates source-of-truth failures. Cache failures are absorbed.
    pub async fn build_series_index(&self, key: &SeriesIndexKey) -> Result<usize, StorageError> {
        if !self.cache.is_remote_available() {
            tracing::debug!(index = %key, "remote cache unavailable, skipping index build");
            return Ok(0);
        }

        let started = Instant::now();
        let records = self.source.list_for_index(&key.scope).await?;
        let members: Vec<SortedSetMember> = records
            .iter()
            .filter(|r| !r.is_excluded())
            .map(|r| {
                SortedSetMember::new(
                    r.id.clone(),
                    calculate_score(r, key.sort_field, key.sort_order),
                )
            })
            .collect();

        let cache_key = key.cache_key();
        let existing = self.cache.z_range(&cache_key, 0, -1).await;

        if !members.is_empty() {
            self.cache.z_add(&cache_key, &members).await;
            self.cache.expire(&cache_key, self.index_ttl_secs).await;
        }

        let current: HashSet<&str> = members.iter().map(|m| m.value.as_str()).collect();
        let stale: Vec<String> = existing
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            self.cache.z_remove(&cache_key, &stale).await;
        }

        self.cache.delete_remote(&key.dirty_key()).await;

        crate::metrics::record_index_rebuild(
            key.sort_field.as_str(),
            members.len(),
            started.elapsed(),
        );
        tracing::debug!(
            index = %key,
            members = members.len(),
            stale = stale.len(),
            "built series index"
        );
        Ok(members.len())
    }

    /// Builds the index unless it is already warm, at most once concurrently.
    async fn ensure_index(&self, key: &SeriesIndexKey) -> Result<(), StorageError> {
        if self.is_index_warmed(key).await {
            return Ok(());
        }

        let lock = self
            .build_locks
            .entry(key.cache_key())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        // Another task may have built it while we waited.
        if self.is_index_warmed(key).await {
            return Ok(());
        }
        self.build_series_index(key).await.map(|_| ())
    }

    /// Reads `limit` IDs starting at rank `offset`, building the index first
    /// if it is absent or dirty.
    ///
    /// Returns an empty page when L2 is unavailable.
    ///
    /// # Errors
    ///
    /// Propagates source-of-truth failures from a rebuild.
    pub async fn get_series_page(
        &self,
        key: &SeriesIndexKey,
        offset: u64,
        limit: u64,
    ) -> Result<SeriesPage, StorageError> {
        if !self.cache.is_remote_available() {
            return Ok(SeriesPage::empty(offset, limit));
        }

        self.ensure_index(key).await?;

        let cache_key = key.cache_key();
        let total_count = self.cache.z_card(&cache_key).await;
        let ids = if limit == 0 || offset >= total_count {
            Vec::new()
        } else {
            // Negative ranks count from the tail, so clamp instead of wrapping.
            let start = i64::try_from(offset).unwrap_or(i64::MAX);
            let stop = i64::try_from(offset.saturating_add(limit - 1)).unwrap_or(i64::MAX);
            self.cache.z_range(&cache_key, start, stop).await
        };

        Ok(SeriesPage {
            ids,
            total_count,
            offset,
            limit,
        })
    }

    /// Marks every index of `scope` and of the "all" scope dirty.
    ///
    /// Returns the number of markers written.
    pub async fn invalidate_series_indices(&self, scope: &IndexScope) -> usize {
        if !self.cache.is_remote_available() {
            return 0;
        }

        let keys: Vec<SeriesIndexKey> = affected_scopes(std::slice::from_ref(scope))
            .iter()
            .flat_map(SeriesIndexKey::all_for_scope)
            .collect();
        let marked = join_all(keys.iter().map(|key| self.mark_index_dirty(key)))
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        tracing::debug!(scope = %scope, marked, "marked series indices dirty");
        marked
    }

    /// Re-scores one series in every existing index of `scopes` and "all".
    ///
    /// If the series is gone, soft-deleted or hidden it is removed instead.
    /// Indices that do not exist yet are left alone; they get a full build on
    /// first read. Returns the number of indices touched.
    ///
    /// # Errors
    ///
    /// Propagates a failure to fetch the series from the source of truth.
    pub async fn update_series_in_indices(
        &self,
        series_id: &str,
        scopes: &[IndexScope],
    ) -> Result<usize, StorageError> {
        if !self.cache.is_remote_available() {
            return Ok(0);
        }

        let record = match self.source.get_for_index(series_id).await? {
            Some(record) if !record.is_excluded() => record,
            _ => return Ok(self.remove_series_from_indices(series_id, scopes).await),
        };

        let keys: Vec<SeriesIndexKey> = affected_scopes(scopes)
            .iter()
            .flat_map(SeriesIndexKey::all_for_scope)
            .collect();

        let updates = keys.iter().map(|key| {
            let record = &record;
            async move {
                let cache_key = key.cache_key();
                if !self.cache.z_exists(&cache_key).await {
                    return false;
                }
                if key.scope.contains(record) {
                    let score = calculate_score(record, key.sort_field, key.sort_order);
                    self.cache
                        .z_add(&cache_key, &[SortedSetMember::new(record.id.clone(), score)])
                        .await;
                } else {
                    self.cache
                        .z_remove(&cache_key, std::slice::from_ref(&record.id))
                        .await;
                }
                true
            }
        });
        let touched = join_all(updates).await.into_iter().filter(|t| *t).count();

        tracing::debug!(series_id = %series_id, touched, "updated series in indices");
        Ok(touched)
    }

    /// Removes one series from every index of `scopes` and "all".
    ///
    /// Returns the number of indices it was removed from.
    pub async fn remove_series_from_indices(&self, series_id: &str, scopes: &[IndexScope]) -> usize {
        if !self.cache.is_remote_available() {
            return 0;
        }

        let keys: Vec<SeriesIndexKey> = affected_scopes(scopes)
            .iter()
            .flat_map(SeriesIndexKey::all_for_scope)
            .collect();
        let member = [series_id.to_string()];
        let member = &member[..];
        let removals = keys
            .iter()
            .map(|key| async move { self.cache.z_remove(&key.cache_key(), member).await });
        let removed: u64 = join_all(removals).await.into_iter().sum();

        tracing::debug!(series_id = %series_id, removed, "removed series from indices");
        removed as usize
    }

    /// Builds every field/order index for `scope`. Failures are logged and
    /// skipped. Returns the number of indices built.
    pub async fn warm_series_indices(&self, scope: &IndexScope) -> usize {
        if !self.cache.is_remote_available() {
            tracing::debug!(scope = %scope, "remote cache unavailable, skipping index warm-up");
            return 0;
        }

        let mut built = 0;
        for key in SeriesIndexKey::all_for_scope(scope) {
            match self.ensure_index(&key).await {
                Ok(()) => built += 1,
                Err(e) => {
                    tracing::warn!(index = %key, error = %e, "failed to warm series index");
                }
            }
        }
        tracing::info!(scope = %scope, built, "warmed series indices");
        built
    }

    /// Deletes every index and dirty marker.
    pub async fn clear_all_series_indices(&self) -> u64 {
        let removed = self.cache.invalidate_pattern(INDEX_NAMESPACE).await;
        self.build_locks.clear();
        tracing::info!(removed, "cleared all series indices");
        removed
    }
}

/// `scopes` plus [`IndexScope::All`], without duplicates.
fn affected_scopes(scopes: &[IndexScope]) -> Vec<IndexScope> {
    let mut all: Vec<IndexScope> = scopes.to_vec();
    all.push(IndexScope::All);
    all.sort();
    all.dedup();
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keys() {
        let key = SeriesIndexKey::new(
            IndexScope::Library("lib-1".into()),
            SortField::FileCount,
            SortOrder::Desc,
        );
        assert_eq!(key.cache_key(), "series:index:lib-1:file_count:desc");
        assert_eq!(key.dirty_key(), "series:index:lib-1:file_count:desc:dirty");

        let all = SeriesIndexKey::new(IndexScope::All, SortField::Name, SortOrder::Asc);
        assert_eq!(all.to_string(), "series:index:all:name:asc");
    }

    #[test]
    fn test_all_for_scope_covers_cross_product() {
        let keys = SeriesIndexKey::all_for_scope(&IndexScope::All);
        assert_eq!(keys.len(), SortField::ALL.len() * SortOrder::ALL.len());
        let unique: HashSet<String> = keys.iter().map(|k| k.cache_key()).collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_affected_scopes_dedups_all() {
        assert_eq!(affected_scopes(&[]), vec![IndexScope::All]);
        assert_eq!(affected_scopes(&[IndexScope::All]), vec![IndexScope::All]);
        assert_eq!(
            affected_scopes(&[IndexScope::Library("b".into()), IndexScope::Library("b".into())]),
            vec![IndexScope::All, IndexScope::Library("b".into())]
        );
    }
}
