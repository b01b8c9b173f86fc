//! Shared, hot-swappable feature flag handle.
//!
//! Readers are on hot paths (every cached query consults the bulk-mutation
//! flag), so the flag set is held behind an `ArcSwap` and replaced wholesale
//! on write instead of being locked.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::feature_flags::{FeatureFlag, FeatureFlags};

/// Set while a library scan or bulk metadata edit is rewriting records.
pub const BULK_MUTATION_IN_PROGRESS: &str = "library.bulk_mutation.in_progress";

/// Cloneable handle to the process-wide flag set.
#[derive(Clone)]
pub struct SharedFlags {
    inner: Arc<ArcSwap<FeatureFlags>>,
}

impl SharedFlags {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(flags)),
        }
    }

    /// Check whether a flag is currently enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.inner.load().is_enabled(name)
    }

    /// Snapshot of the current flag set.
    pub fn snapshot(&self) -> Arc<FeatureFlags> {
        self.inner.load_full()
    }

    /// Replace the whole flag set.
    pub fn replace(&self, flags: FeatureFlags) {
        self.inner.store(Arc::new(flags));
    }

    /// Upsert a single boolean flag.
    pub fn set_flag(&self, name: &str, enabled: bool) {
        self.inner.rcu(|current| {
            let mut next = FeatureFlags::clone(current);
            next.set(FeatureFlag::boolean(name, enabled));
            next
        });
        tracing::debug!(flag = name, enabled, "feature flag updated");
    }

    pub fn is_bulk_mutation_in_progress(&self) -> bool {
        self.is_enabled(BULK_MUTATION_IN_PROGRESS)
    }

    pub fn set_bulk_mutation_in_progress(&self, in_progress: bool) {
        self.set_flag(BULK_MUTATION_IN_PROGRESS, in_progress);
    }
}

impl Default for SharedFlags {
    fn default() -> Self {
        Self::new(FeatureFlags::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_flag_visible_to_clones() {
        let flags = SharedFlags::default();
        let reader = flags.clone();

        assert!(!reader.is_bulk_mutation_in_progress());
        flags.set_bulk_mutation_in_progress(true);
        assert!(reader.is_bulk_mutation_in_progress());
        flags.set_bulk_mutation_in_progress(false);
        assert!(!reader.is_bulk_mutation_in_progress());
    }

    #[test]
    fn test_replace_drops_unlisted_flags() {
        let flags = SharedFlags::default();
        flags.set_flag("custom", true);
        assert!(flags.is_enabled("custom"));

        flags.replace(FeatureFlags::new());
        assert!(!flags.is_enabled("custom"));
        assert!(flags.snapshot().is_empty());
    }
}
