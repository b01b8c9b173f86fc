//! Cache statistics and health reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-layer operation counters.
///
/// Counters are process-lifetime and only reset through [`LayerStats::reset`].
#[derive(Debug, Default)]
pub struct LayerStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl LayerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LayerStatsSnapshot {
        LayerStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`LayerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl LayerStatsSnapshot {
    /// Hit rate in `[0, 1]`; 0 when nothing was recorded.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }
}

/// Statistics across both layers.
///
/// `total_hits`/`total_misses` count façade-level lookups: a read that misses
/// L1 and hits L2 is one hit, not one miss plus one hit.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedCacheStats {
    pub l1: LayerStatsSnapshot,
    pub l2: LayerStatsSnapshot,
    pub l1_entries: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both layers available.
    Healthy,
    /// Running on L1 only.
    Degraded,
    /// L1 reported unavailable. Indicates an internal bug, not a runtime condition.
    Unhealthy,
}

/// Derived health of the cache, recomputed on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub l1_available: bool,
    pub l2_available: bool,
}

impl CacheHealth {
    pub fn from_availability(l1_available: bool, l2_available: bool) -> Self {
        let status = match (l1_available, l2_available) {
            (false, _) => HealthStatus::Unhealthy,
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Degraded,
        };
        Self {
            status,
            l1_available,
            l2_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_calculation() {
        let stats = LayerStatsSnapshot {
            hits: 75,
            misses: 25,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 1e-9);
        assert_eq!(LayerStatsSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_reset() {
        let stats = LayerStats::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_set();
        stats.record_delete();
        stats.record_error();
        assert_eq!(
            stats.snapshot(),
            LayerStatsSnapshot {
                hits: 1,
                misses: 1,
                sets: 1,
                deletes: 1,
                errors: 1
            }
        );

        stats.reset();
        assert_eq!(stats.snapshot(), LayerStatsSnapshot::default());
    }

    #[test]
    fn test_health_status() {
        assert_eq!(
            CacheHealth::from_availability(true, true).status,
            HealthStatus::Healthy
        );
        assert_eq!(
            CacheHealth::from_availability(true, false).status,
            HealthStatus::Degraded
        );
        assert_eq!(
            CacheHealth::from_availability(false, true).status,
            HealthStatus::Unhealthy
        );
    }
}
