//! Runtime configuration primitives shared across Mediashelf crates.
//!
//! - [`FeatureFlags`]: named on/off switches
//! - [`SharedFlags`]: a lock-free, hot-swappable handle to the current flag set
//!
//! The cache layer reads [`flags::BULK_MUTATION_IN_PROGRESS`] to shorten result
//! cache lifetimes while a library scan or bulk edit is rewriting records.

pub mod feature_flags;
pub mod flags;

pub use feature_flags::{FeatureFlag, FeatureFlags};
pub use flags::{BULK_MUTATION_IN_PROGRESS, SharedFlags};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
