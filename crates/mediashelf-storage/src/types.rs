//! Record projections used by the index engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Partition an index is built over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexScope {
    /// Every qualifying series across all libraries.
    All,
    /// Series belonging to one library.
    Library(String),
}

impl IndexScope {
    /// Builds a scope from an optional library ID (`None` means [`IndexScope::All`]).
    #[must_use]
    pub fn from_library(library_id: Option<&str>) -> Self {
        match library_id {
            Some(id) => Self::Library(id.to_string()),
            None => Self::All,
        }
    }

    /// Returns `true` if `record` belongs to this scope.
    #[must_use]
    pub fn contains(&self, record: &SeriesIndexRecord) -> bool {
        match self {
            Self::All => true,
            Self::Library(id) => record.library_id == *id,
        }
    }
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Library(id) => f.write_str(id),
        }
    }
}

/// Minimal projection of a series needed to place it in an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesIndexRecord {
    /// The series ID (the sorted-set member).
    pub id: String,
    /// Owning library.
    pub library_id: String,
    /// Display name.
    pub name: String,
    /// Number of media files in the series.
    pub file_count: u32,
    /// Publication year, if known.
    pub year: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Soft-delete marker.
    #[serde(default)]
    pub is_deleted: bool,
    /// Hidden from browsing by the user.
    #[serde(default)]
    pub is_hidden: bool,
}

impl SeriesIndexRecord {
    /// Creates a visible record with both timestamps set to now.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        library_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            library_id: library_id.into(),
            name: name.into(),
            file_count: 0,
            year: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            is_hidden: false,
        }
    }

    #[must_use]
    pub fn with_file_count(mut self, file_count: u32) -> Self {
        self.file_count = file_count;
        self
    }

    #[must_use]
    pub fn with_year(mut self, year: Option<i32>) -> Self {
        self.year = year;
        self
    }

    #[must_use]
    pub fn with_timestamps(mut self, created_at: OffsetDateTime, updated_at: OffsetDateTime) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    /// Returns `true` if the record must not appear in any index.
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.is_deleted || self.is_hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        assert_eq!(IndexScope::All.to_string(), "all");
        assert_eq!(IndexScope::Library("lib-1".into()).to_string(), "lib-1");
        assert_eq!(IndexScope::from_library(None), IndexScope::All);
        assert_eq!(
            IndexScope::from_library(Some("lib-2")),
            IndexScope::Library("lib-2".into())
        );
    }

    #[test]
    fn test_scope_contains() {
        let record = SeriesIndexRecord::new("s1", "lib-1", "Akira");
        assert!(IndexScope::All.contains(&record));
        assert!(IndexScope::Library("lib-1".into()).contains(&record));
        assert!(!IndexScope::Library("lib-2".into()).contains(&record));
    }

    #[test]
    fn test_record_serialization() {
        let record = SeriesIndexRecord::new("s1", "lib-1", "Berserk")
            .with_file_count(41)
            .with_year(Some(1989))
            .with_timestamps(
                time::macros::datetime!(2024-01-01 0:00 UTC),
                time::macros::datetime!(2024-02-01 12:30 UTC),
            );

        let json = serde_json::to_string(&record).expect("serialization failed");
        let back: SeriesIndexRecord = serde_json::from_str(&json).expect("deserialization failed");
        assert_eq!(record, back);
    }

    #[test]
    fn test_is_excluded() {
        let mut record = SeriesIndexRecord::new("s1", "lib-1", "Monster");
        assert!(!record.is_excluded());
        record.is_hidden = true;
        assert!(record.is_excluded());
        record.is_hidden = false;
        record.is_deleted = true;
        assert!(record.is_excluded());
    }
}
