use mediashelf_config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Redis (L2) configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache layer tuning
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let redis = &self.redis;
        if redis.pool_size == 0 {
            return Err(ConfigError::validation("redis.pool_size must be > 0"));
        }
        if redis.connect_timeout_ms == 0 || redis.command_timeout_ms == 0 {
            return Err(ConfigError::validation("redis timeouts must be > 0"));
        }
        if redis.reconnect_base_delay_ms > redis.reconnect_max_delay_ms {
            return Err(ConfigError::validation(
                "redis.reconnect_base_delay_ms must be <= redis.reconnect_max_delay_ms",
            ));
        }

        let cache = &self.cache;
        if cache.local_max_entries == 0 {
            return Err(ConfigError::validation("cache.local_max_entries must be > 0"));
        }
        if cache.query_ttl_bulk_secs > cache.query_ttl_secs {
            return Err(ConfigError::validation(
                "cache.query_ttl_bulk_secs must be <= cache.query_ttl_secs",
            ));
        }
        if cache.dirty_marker_ttl_secs == 0 || cache.index_ttl_secs == 0 {
            return Err(ConfigError::validation("cache index TTLs must be > 0"));
        }
        Ok(())
    }
}

/// Redis configuration for the shared L2 cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (local cache only)
    #[serde(default)]
    pub enabled: bool,

    /// Full connection URL. When set, host/port/password/database are ignored.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub database: u8,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Reconnect attempts before giving up until a manual reconnect
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay for attempt `n` is `min(n * base, max)`
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Namespace prepended to every key this process owns
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_ms() -> u64 {
    2000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    100
}

fn default_reconnect_max_delay_ms() -> u64 {
    3000
}

fn default_key_prefix() -> String {
    "mediashelf:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            database: 0,
            pool_size: default_redis_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    /// Connection URL, assembled from host/port/password/database unless `url` is set.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.database
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    /// Same as [`connection_url`](Self::connection_url) with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                self.connection_url().replace(password.as_str(), "***")
            }
            _ => self.connection_url(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

/// Cache layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Local (L1) cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// How often expired L1 entries are swept
    #[serde(default = "default_local_cleanup_interval_secs")]
    pub local_cleanup_interval_secs: u64,

    /// TTL given to L1 copies backfilled from an L2 hit
    #[serde(default = "default_backfill_ttl_secs")]
    pub backfill_ttl_secs: u64,

    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Lifetime of a pagination index that nobody reads
    #[serde(default = "default_index_ttl_secs")]
    pub index_ttl_secs: u64,

    #[serde(default = "default_dirty_marker_ttl_secs")]
    pub dirty_marker_ttl_secs: u64,

    #[serde(default = "default_query_ttl_secs")]
    pub query_ttl_secs: u64,

    /// Query TTL while a bulk mutation is in progress
    #[serde(default = "default_query_ttl_bulk_secs")]
    pub query_ttl_bulk_secs: u64,

    #[serde(default = "default_count_ttl_secs")]
    pub count_ttl_secs: u64,
}

fn default_local_max_entries() -> usize {
    10000
}

fn default_local_cleanup_interval_secs() -> u64 {
    60
}

fn default_backfill_ttl_secs() -> u64 {
    60
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_index_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_dirty_marker_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_query_ttl_secs() -> u64 {
    300
}

fn default_query_ttl_bulk_secs() -> u64 {
    30
}

fn default_count_ttl_secs() -> u64 {
    120
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_entries: default_local_max_entries(),
            local_cleanup_interval_secs: default_local_cleanup_interval_secs(),
            backfill_ttl_secs: default_backfill_ttl_secs(),
            default_ttl_secs: default_ttl_secs(),
            index_ttl_secs: default_index_ttl_secs(),
            dirty_marker_ttl_secs: default_dirty_marker_ttl_secs(),
            query_ttl_secs: default_query_ttl_secs(),
            query_ttl_bulk_secs: default_query_ttl_bulk_secs(),
            count_ttl_secs: default_count_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use mediashelf_config::ConfigError;
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("mediashelf.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., MEDIASHELF__REDIS__PORT=6380
        builder = builder.add_source(
            Environment::with_prefix("MEDIASHELF")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.redis.enabled);
        assert_eq!(cfg.cache.dirty_marker_ttl_secs, 3600);
        assert_eq!(cfg.redis.connection_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_connection_url_with_password() {
        let cfg = RedisConfig {
            password: Some("s3cret".into()),
            database: 2,
            ..RedisConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://:s3cret@127.0.0.1:6379/2");
        assert_eq!(cfg.redacted_url(), "redis://:***@127.0.0.1:6379/2");

        let explicit = RedisConfig {
            url: Some("redis://cache:6380".into()),
            ..RedisConfig::default()
        };
        assert_eq!(explicit.connection_url(), "redis://cache:6380");
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut cfg = AppConfig::default();
        cfg.redis.reconnect_base_delay_ms = 5000;
        cfg.redis.reconnect_max_delay_ms = 1000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bulk_ttl_above_normal() {
        let mut cfg = AppConfig::default();
        cfg.cache.query_ttl_bulk_secs = cfg.cache.query_ttl_secs + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        writeln!(
            file,
            "[redis]\nenabled = true\nport = 6390\nkey_prefix = \"test:\"\n\n[cache]\nbackfill_ttl_secs = 15"
        )
        .expect("write config");

        let path = file.path().to_string_lossy().to_string();
        let cfg = loader::load_config(Some(&path)).expect("load config");
        assert!(cfg.redis.enabled);
        assert_eq!(cfg.redis.port, 6390);
        assert_eq!(cfg.redis.key_prefix, "test:");
        assert_eq!(cfg.cache.backfill_ttl_secs, 15);
        assert_eq!(cfg.cache.count_ttl_secs, 120);
    }
}
