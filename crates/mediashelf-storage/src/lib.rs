//! # mediashelf-storage
//!
//! The narrow read interface the cache layer needs from the relational store.
//!
//! The pagination index only ever asks two questions of the source of truth:
//! "which series qualify for this scope, with their sort fields" and "what
//! does this one series look like now". Both are expressed by
//! [`SeriesSource`]; concrete stores live in separate crates.
//!
//! ## Example
//!
//! ```ignore
//! use mediashelf_storage::{IndexScope, SeriesSource, StorageError};
//!
//! async fn visible_names(source: &dyn SeriesSource) -> Result<Vec<String>, StorageError> {
//!     let records = source.list_for_index(&IndexScope::All).await?;
//!     Ok(records.into_iter().map(|r| r.name).collect())
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::StorageError;
pub use traits::{DynSeriesSource, SeriesSource};
pub use types::{IndexScope, SeriesIndexRecord};
