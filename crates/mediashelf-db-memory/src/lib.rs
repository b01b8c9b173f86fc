//! In-memory series store for Mediashelf.
//!
//! Implements [`SeriesSource`] over a concurrent map so the cache layer can be
//! exercised without a relational database.
//!
//! # Example
//!
//! ```ignore
//! use mediashelf_db_memory::InMemorySeriesStore;
//! use mediashelf_storage::{IndexScope, SeriesIndexRecord, SeriesSource};
//!
//! let store = InMemorySeriesStore::new();
//! store.upsert(SeriesIndexRecord::new("s1", "lib-1", "Akira"));
//! let records = store.list_for_index(&IndexScope::All).await?;
//! ```

pub mod store;

pub use mediashelf_storage::{SeriesSource, StorageError};
pub use store::InMemorySeriesStore;

/// Creates a new shareable in-memory series source.
pub fn create_series_source() -> mediashelf_storage::DynSeriesSource {
    std::sync::Arc::new(InMemorySeriesStore::new())
}
