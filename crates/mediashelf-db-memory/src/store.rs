use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use mediashelf_storage::{IndexScope, SeriesIndexRecord, SeriesSource, StorageError};
use time::OffsetDateTime;

/// In-memory series store keyed by series ID.
///
/// Soft-delete and hide only flip flags, mirroring how the relational store
/// keeps excluded rows around. Call counters and a failure switch let tests
/// assert how often the cache layer fell through to the source of truth.
#[derive(Debug, Default)]
pub struct InMemorySeriesStore {
    records: DashMap<String, SeriesIndexRecord>,
    list_calls: AtomicU64,
    get_calls: AtomicU64,
    failing: AtomicBool,
}

impl InMemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = SeriesIndexRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Inserts or replaces a record.
    pub fn upsert(&self, record: SeriesIndexRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Applies `f` to a stored record and bumps `updated_at`.
    ///
    /// Returns `false` if the record does not exist.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut SeriesIndexRecord)) -> bool {
        match self.records.get_mut(id) {
            Some(mut entry) => {
                f(&mut entry);
                entry.updated_at = OffsetDateTime::now_utc();
                true
            }
            None => false,
        }
    }

    pub fn soft_delete(&self, id: &str) -> bool {
        self.update(id, |r| r.is_deleted = true)
    }

    pub fn set_hidden(&self, id: &str, hidden: bool) -> bool {
        self.update(id, |r| r.is_hidden = hidden)
    }

    /// Removes a record entirely (hard delete).
    pub fn remove(&self, id: &str) -> Option<SeriesIndexRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Makes every subsequent read fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `list_for_index` calls served so far.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_for_index` calls served so far.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::connection_error("in-memory store set to fail"));
        }
        Ok(())
    }
}

#[async_trait]
impl SeriesSource for InMemorySeriesStore {
    async fn list_for_index(
        &self,
        scope: &IndexScope,
    ) -> Result<Vec<SeriesIndexRecord>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;

        Ok(self
            .records
            .iter()
            .filter(|entry| !entry.is_excluded() && scope.contains(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_for_index(&self, id: &str) -> Result<Option<SeriesIndexRecord>, StorageError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;

        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }
}
