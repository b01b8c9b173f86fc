//! Tracing setup for processes embedding the cache layer.
//!
//! The installed filter sits behind a reload handle so the level can follow
//! configuration changes without a restart.

use std::sync::OnceLock;

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// The Redis client and its pool log every command at debug.
const QUIET_TARGETS: &[(&str, &str)] = &[("redis", "warn"), ("deadpool", "warn")];

/// Parses `level` (a level or full directive list) and caps the noisy client
/// crates unless `level` mentions them itself.
fn build_filter(level: &str) -> Result<EnvFilter, ParseError> {
    let mut filter = EnvFilter::try_new(level)?;
    for (target, cap) in QUIET_TARGETS {
        if !level.contains(target) {
            filter = filter.add_directive(format!("{target}={cap}").parse()?);
        }
    }
    Ok(filter)
}

pub fn init_tracing() -> bool {
    init_tracing_with_level("info")
}

pub fn init_tracing_from_config(logging: &LoggingConfig) -> bool {
    init_tracing_with_level(&logging.level)
}

/// Installs the global subscriber. `RUST_LOG`, when set and valid, wins over
/// `level`; an invalid `level` falls back to `info`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing_with_level(level: &str) -> bool {
    let filter = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| build_filter(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let (layer, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
    installed
}

/// Swaps the active filter. Returns `false` if tracing was not installed by
/// [`init_tracing_with_level`] or `level` does not parse.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    let filter = match build_filter(level) {
        Ok(filter) => filter,
        Err(e) => {
            tracing::warn!(level, error = %e, "ignoring invalid log level");
            return false;
        }
    };
    let applied = handle.modify(|current| *current = filter).is_ok();
    if applied {
        tracing::info!(level, "log level changed");
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_quiets_client_crates() {
        let filter = build_filter("debug").unwrap().to_string();
        assert!(filter.contains("redis=warn"));
        assert!(filter.contains("deadpool=warn"));

        let explicit = build_filter("info,redis=trace").unwrap().to_string();
        assert!(explicit.contains("redis=trace"));
        assert!(!explicit.contains("redis=warn"));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(build_filter("mediashelf_cache=loud").is_err());
    }
}
