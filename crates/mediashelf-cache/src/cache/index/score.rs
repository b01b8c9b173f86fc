//! Sort fields and sorted-set score computation.

use std::fmt;
use std::str::FromStr;

use mediashelf_storage::SeriesIndexRecord;
use serde::{Deserialize, Serialize};

/// Number of leading characters that contribute to a text score.
const TEXT_SCORE_CHARS: usize = 8;

/// Sortable series attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    CreatedAt,
    UpdatedAt,
    FileCount,
    Year,
}

impl SortField {
    pub const ALL: [SortField; 5] = [
        SortField::Name,
        SortField::CreatedAt,
        SortField::UpdatedAt,
        SortField::FileCount,
        SortField::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::FileCount => "file_count",
            SortField::Year => "year",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(SortField::Name),
            "created_at" | "createdAt" => Ok(SortField::CreatedAt),
            "updated_at" | "updatedAt" => Ok(SortField::UpdatedAt),
            "file_count" | "fileCount" => Ok(SortField::FileCount),
            "year" => Ok(SortField::Year),
            other => Err(format!("unknown sort field: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub const ALL: [SortOrder; 2] = [SortOrder::Asc, SortOrder::Desc];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Maps the first eight case-folded characters of `text` to a base-256 number.
///
/// Code points above 255 are clamped to 255. Shorter strings are padded with
/// zeros on the right, so a prefix always scores at or below its extensions.
/// The exact value fits in a `u64`; the `f64` conversion keeps the order
/// non-decreasing but only distinguishes roughly the first six characters.
pub fn text_score(text: &str) -> f64 {
    let mut chars = text.chars().flat_map(char::to_lowercase);
    let mut score: u64 = 0;
    for _ in 0..TEXT_SCORE_CHARS {
        let digit = chars.next().map_or(0, |c| u64::from(c).min(255));
        score = (score << 8) | digit;
    }
    score as f64
}

/// Score of `record` in the index for `field`/`order`.
///
/// Descending indices store negated scores so a single ascending range read
/// serves both orders.
pub fn calculate_score(record: &SeriesIndexRecord, field: SortField, order: SortOrder) -> f64 {
    let score = match field {
        SortField::Name => text_score(&record.name),
        SortField::CreatedAt => epoch_millis(record.created_at),
        SortField::UpdatedAt => epoch_millis(record.updated_at),
        SortField::FileCount => f64::from(record.file_count),
        SortField::Year => f64::from(record.year.unwrap_or(0)),
    };
    match order {
        SortOrder::Asc => score,
        SortOrder::Desc => -score,
    }
}

/// Like [`calculate_score`] for an unvalidated field name. Unknown fields score 0.
pub fn calculate_score_by_name(record: &SeriesIndexRecord, field: &str, order: SortOrder) -> f64 {
    match field.parse::<SortField>() {
        Ok(field) => calculate_score(record, field, order),
        Err(_) => {
            tracing::debug!(field = %field, "unknown sort field, scoring 0");
            0.0
        }
    }
}

fn epoch_millis(ts: time::OffsetDateTime) -> f64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(name: &str) -> SeriesIndexRecord {
        SeriesIndexRecord::new("s1", "lib-1", name)
            .with_file_count(12)
            .with_year(Some(1999))
            .with_timestamps(datetime!(2024-01-02 03:04:05 UTC), datetime!(2024-06-01 00:00:00 UTC))
    }

    #[test]
    fn test_text_score_is_base_256() {
        assert_eq!(text_score(""), 0.0);
        assert_eq!(text_score("a"), (97u64 << 56) as f64);
        assert_eq!(text_score("ab"), ((97u64 << 56) | (98u64 << 48)) as f64);
    }

    #[test]
    fn test_text_score_case_folds_and_truncates() {
        assert_eq!(text_score("Akira"), text_score("akira"));
        assert_eq!(text_score("abcdefghXYZ"), text_score("abcdefgh"));
    }

    #[test]
    fn test_text_score_clamps_wide_code_points() {
        assert_eq!(text_score("日"), text_score("\u{ff}"));
    }

    #[test]
    fn test_text_score_follows_prefix_order() {
        let mut names = vec!["zeta", "Alpha", "beta", "alp", "Gamma", "b", "delta"];
        names.sort_by_key(|n| n.to_lowercase());
        let scores: Vec<f64> = names.iter().map(|n| text_score(n)).collect();
        assert!(scores.windows(2).all(|w| w[0] < w[1]), "{names:?} -> {scores:?}");
    }

    #[test]
    fn test_text_score_ties_past_float_precision() {
        assert_eq!(text_score("abcdefga"), text_score("abcdefgz"));
        assert_eq!(text_score("abcdefga"), text_score("ABCDEFGZ"));
        assert!(text_score("abcdef") < text_score("abcdeg"));
    }

    #[test]
    fn test_numeric_fields() {
        let r = record("x");
        assert_eq!(calculate_score(&r, SortField::FileCount, SortOrder::Asc), 12.0);
        assert_eq!(calculate_score(&r, SortField::Year, SortOrder::Asc), 1999.0);
        assert_eq!(
            calculate_score(&r, SortField::CreatedAt, SortOrder::Asc),
            1_704_164_645_000.0
        );

        let no_year = r.clone().with_year(None);
        assert_eq!(calculate_score(&no_year, SortField::Year, SortOrder::Asc), 0.0);
    }

    #[test]
    fn test_descending_negates() {
        let r = record("Berserk");
        for field in SortField::ALL {
            let asc = calculate_score(&r, field, SortOrder::Asc);
            let desc = calculate_score(&r, field, SortOrder::Desc);
            assert_eq!(desc, -asc, "{field}");
        }
    }

    #[test]
    fn test_score_by_name() {
        let r = record("x");
        assert_eq!(calculate_score_by_name(&r, "fileCount", SortOrder::Desc), -12.0);
        assert_eq!(calculate_score_by_name(&r, "rating", SortOrder::Asc), 0.0);
    }

    #[test]
    fn test_parse_sort_parameters() {
        assert_eq!("created_at".parse::<SortField>(), Ok(SortField::CreatedAt));
        assert_eq!("DESC".parse::<SortOrder>(), Ok(SortOrder::Desc));
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
