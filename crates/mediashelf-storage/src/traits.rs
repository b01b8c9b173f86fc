//! Source-of-truth traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{IndexScope, SeriesIndexRecord};

/// Read access to series records for index maintenance.
///
/// Implementations must be thread-safe (`Send + Sync`); the index engine calls
/// them concurrently from independent page requests.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Returns every qualifying series in `scope`.
    ///
    /// Soft-deleted and hidden series are excluded. Order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues; an empty scope is `Ok(vec![])`.
    async fn list_for_index(
        &self,
        scope: &IndexScope,
    ) -> Result<Vec<SeriesIndexRecord>, StorageError>;

    /// Returns one series by ID, including soft-deleted and hidden ones.
    ///
    /// Returns `None` if the series does not exist at all.
    async fn get_for_index(&self, id: &str) -> Result<Option<SeriesIndexRecord>, StorageError>;
}

/// Type alias for a shareable series source.
pub type DynSeriesSource = Arc<dyn SeriesSource>;
