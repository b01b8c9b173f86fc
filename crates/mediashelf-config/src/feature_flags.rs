//! Named on/off switches for dynamic behaviour toggling

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// A single feature flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name (e.g., "library.bulk_mutation.in_progress")
    pub name: String,
    /// Whether the flag is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Description of what this flag controls
    #[serde(default)]
    pub description: Option<String>,
    /// When this flag was last updated
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub updated_at: Option<OffsetDateTime>,
}

impl FeatureFlag {
    /// Create a new boolean feature flag
    pub fn boolean(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            description: None,
            updated_at: Some(OffsetDateTime::now_utc()),
        }
    }

    /// Add description to flag
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Collection of feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(flatten)]
    flags: HashMap<String, FeatureFlag>,
}

impl FeatureFlags {
    /// Create a new empty feature flags collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with default built-in flags
    pub fn with_defaults() -> Self {
        let mut flags = Self::new();

        flags.set(
            FeatureFlag::boolean(crate::flags::BULK_MUTATION_IN_PROGRESS, false)
                .with_description("A scan or bulk edit is rewriting series records"),
        );

        flags
    }

    /// Set a feature flag
    pub fn set(&mut self, flag: FeatureFlag) {
        self.flags.insert(flag.name.clone(), flag);
    }

    /// Get a feature flag by name
    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.get(name)
    }

    /// Check if a flag is currently enabled. Unknown flags are off.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.flags.get(name).is_some_and(|flag| flag.enabled)
    }

    /// Remove a feature flag
    pub fn remove(&mut self, name: &str) -> Option<FeatureFlag> {
        self.flags.remove(name)
    }

    /// List all flags
    pub fn list(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.flags.values()
    }

    /// Merge with another set of flags (other takes precedence)
    pub fn merge(&mut self, other: FeatureFlags) {
        for (name, flag) in other.flags {
            self.flags.insert(name, flag);
        }
    }

    /// Get the number of flags
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_flags_collection() {
        let mut flags = FeatureFlags::new();
        flags.set(FeatureFlag::boolean("feature.a", true));
        flags.set(FeatureFlag::boolean("feature.b", false));

        assert!(flags.is_enabled("feature.a"));
        assert!(!flags.is_enabled("feature.b"));
        assert!(!flags.is_enabled("feature.unknown"));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = FeatureFlags::with_defaults();
        base.set(FeatureFlag::boolean("feature.a", false));
        let mut overrides = FeatureFlags::new();
        overrides.set(FeatureFlag::boolean(crate::flags::BULK_MUTATION_IN_PROGRESS, true));

        base.merge(overrides);
        assert!(base.is_enabled(crate::flags::BULK_MUTATION_IN_PROGRESS));
        assert!(!base.is_enabled("feature.a"));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_default_flags() {
        let flags = FeatureFlags::with_defaults();
        assert!(flags.get(crate::flags::BULK_MUTATION_IN_PROGRESS).is_some());
        assert!(!flags.is_enabled(crate::flags::BULK_MUTATION_IN_PROGRESS));
    }
}
