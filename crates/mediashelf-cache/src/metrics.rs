//! Prometheus metrics for the cache layer.
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder, so
//! library users and tests pay nothing unless they opt in.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_SETS_TOTAL: &str = "cache_sets_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_L1_ENTRIES: &str = "cache_l1_entries";
    pub const CACHE_REMOTE_RECONNECTS_TOTAL: &str = "cache_remote_reconnects_total";

    pub const INDEX_REBUILDS_TOTAL: &str = "pagination_index_rebuilds_total";
    pub const INDEX_BUILD_DURATION_SECONDS: &str = "pagination_index_build_seconds";

    pub const QUERY_COALESCED_TOTAL: &str = "query_coalesced_total";
}

/// Index builds range from milliseconds for a small library to tens of
/// seconds for 50k+ series.
const INDEX_BUILD_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Installs the Prometheus recorder for this process.
///
/// Returns `false` if it was already installed or installation failed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let installed = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::INDEX_BUILD_DURATION_SECONDS.to_string()),
            INDEX_BUILD_BUCKETS,
        )
        .and_then(PrometheusBuilder::install_recorder);

    match installed {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                return false;
            }
            describe_metrics();
            tracing::info!("cache metrics recorder installed");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "cache metrics recorder not installed");
            false
        }
    }
}

/// Prometheus text exposition, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Cache hits by layer");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Lookups that missed every layer");
    describe_counter!(names::CACHE_SETS_TOTAL, "Cache writes by layer");
    describe_counter!(names::CACHE_ERRORS_TOTAL, "Failed cache commands by layer");
    describe_gauge!(names::CACHE_L1_ENTRIES, "Entries held by the local cache");
    describe_counter!(
        names::CACHE_REMOTE_RECONNECTS_TOTAL,
        "Remote cache reconnect attempts by outcome"
    );
    describe_counter!(names::INDEX_REBUILDS_TOTAL, "Full pagination index rebuilds");
    describe_histogram!(
        names::INDEX_BUILD_DURATION_SECONDS,
        Unit::Seconds,
        "Time to rebuild one pagination index"
    );
    describe_counter!(
        names::QUERY_COALESCED_TOTAL,
        "Queries that joined an in-flight computation"
    );
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit on the given layer ("L1" or "L2").
pub fn record_cache_hit(layer: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "layer" => layer).increment(1);
}

/// Record a miss across every layer that was consulted.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_cache_set(layer: &'static str) {
    counter!(names::CACHE_SETS_TOTAL, "layer" => layer).increment(1);
}

pub fn record_cache_error(layer: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "layer" => layer).increment(1);
}

pub fn set_l1_entries(count: usize) {
    gauge!(names::CACHE_L1_ENTRIES).set(count as f64);
}

pub fn record_remote_reconnect(success: bool) {
    counter!(
        names::CACHE_REMOTE_RECONNECTS_TOTAL,
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

// =============================================================================
// Index / Query Metrics
// =============================================================================

pub fn record_index_rebuild(sort_field: &'static str, members: usize, duration: Duration) {
    counter!(names::INDEX_REBUILDS_TOTAL, "sort_field" => sort_field).increment(1);
    histogram!(names::INDEX_BUILD_DURATION_SECONDS).record(duration.as_secs_f64());
    tracing::debug!(sort_field, members, elapsed_ms = duration.as_millis() as u64, "index rebuilt");
}

pub fn record_query_coalesced() {
    counter!(names::QUERY_COALESCED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        assert!(!init_metrics());

        record_cache_hit("L1");
        record_index_rebuild("name", 10, Duration::from_millis(3));
        let rendered = render_metrics().expect("metrics initialized");
        assert!(rendered.contains(names::CACHE_HITS_TOTAL));
    }
}
