//! Redis implementation of [`RemoteBackend`] on a `deadpool-redis` pool.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, RedisError};
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};

use super::backend::{MemoryInfo, RemoteBackend, RemoteError, SortedSetMember};
use crate::config::RedisConfig;

/// Redis-backed remote store.
///
/// The pool is created on [`connect`](RemoteBackend::connect) and swapped out
/// on [`disconnect`](RemoteBackend::disconnect); commands issued in between
/// share it.
pub struct RedisBackend {
    url: String,
    pool_size: usize,
    connect_timeout: Duration,
    pool: ArcSwapOption<Pool>,
}

impl RedisBackend {
    pub fn new(config: &RedisConfig) -> Self {
        Self {
            url: config.connection_url(),
            pool_size: config.pool_size,
            connect_timeout: config.connect_timeout(),
            pool: ArcSwapOption::empty(),
        }
    }

    /// Connection URL, for components that need a dedicated connection (pub/sub).
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn conn(&self) -> Result<Connection, RemoteError> {
        let pool = self.pool.load_full().ok_or(RemoteError::NotConnected)?;
        pool.get()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))
    }

    fn create_pool(&self) -> Result<Pool, RemoteError> {
        let mut redis_config = deadpool_redis::Config::from_url(&self.url);
        let mut pool_config = PoolConfig::new(self.pool_size);
        pool_config.timeouts.wait = Some(self.connect_timeout);
        pool_config.timeouts.create = Some(self.connect_timeout);
        pool_config.timeouts.recycle = Some(self.connect_timeout);
        redis_config.pool = Some(pool_config);

        redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RemoteError::Connection(format!("failed to create Redis pool: {e}")))
    }
}

fn map_redis_error(e: RedisError) -> RemoteError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        RemoteError::Connection(e.to_string())
    } else if e.is_timeout() {
        RemoteError::Timeout("redis")
    } else {
        RemoteError::Command(e.to_string())
    }
}

fn parse_memory_info(info: &str) -> Option<MemoryInfo> {
    let mut used = None;
    let mut max = None;
    for line in info.lines() {
        if let Some(v) = line.strip_prefix("used_memory:") {
            used = v.trim().parse::<u64>().ok();
        } else if let Some(v) = line.strip_prefix("maxmemory:") {
            max = v.trim().parse::<u64>().ok();
        }
    }
    used.map(|used_bytes| MemoryInfo {
        used_bytes,
        max_bytes: max.filter(|m| *m > 0),
    })
}

#[async_trait]
impl RemoteBackend for RedisBackend {
    async fn connect(&self) -> Result<(), RemoteError> {
        let pool = self.create_pool()?;
        let mut conn = pool
            .get()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        drop(conn);

        if let Some(previous) = self.pool.swap(Some(Arc::new(pool))) {
            previous.close();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.swap(None) {
            pool.close();
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), RemoteError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(key, value, ttl_secs.max(1))
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, RemoteError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let deleted: u64 = conn.del(keys.to_vec()).await.map_err(map_redis_error)?;
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await.map_err(map_redis_error)?;
        Ok(exists)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), RemoteError> {
        let mut conn = self.conn().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok((next, keys))
    }

    async fn zadd(&self, key: &str, members: &[SortedSetMember]) -> Result<u64, RemoteError> {
        if members.is_empty() {
            return Ok(0);
        }
        let items: Vec<(f64, &str)> = members
            .iter()
            .map(|m| (m.score, m.value.as_str()))
            .collect();
        let mut conn = self.conn().await?;
        let added: u64 = conn
            .zadd_multiple(key, items.as_slice())
            .await
            .map_err(map_redis_error)?;
        Ok(added)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RemoteError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrange(key, start as isize, stop as isize)
            .await
            .map_err(map_redis_error)?;
        Ok(members)
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<SortedSetMember>, RemoteError> {
        let mut conn = self.conn().await?;
        let pairs: Vec<(String, f64)> = conn
            .zrange_withscores(key, start as isize, stop as isize)
            .await
            .map_err(map_redis_error)?;
        Ok(pairs
            .into_iter()
            .map(|(value, score)| SortedSetMember { value, score })
            .collect())
    }

    async fn zcard(&self, key: &str) -> Result<u64, RemoteError> {
        let mut conn = self.conn().await?;
        let card: u64 = conn.zcard(key).await.map_err(map_redis_error)?;
        Ok(card)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, RemoteError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = conn
            .zrem(key, members.to_vec())
            .await
            .map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, RemoteError> {
        let mut conn = self.conn().await?;
        let applied: bool = conn
            .expire(key, ttl_secs as i64)
            .await
            .map_err(map_redis_error)?;
        Ok(applied)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), RemoteError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .publish(channel, message)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn memory_info(&self) -> Result<Option<MemoryInfo>, RemoteError> {
        let mut conn = self.conn().await?;
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(parse_memory_info(&info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_info() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\nmaxmemory:0\r\n";
        assert_eq!(
            parse_memory_info(info),
            Some(MemoryInfo {
                used_bytes: 1_048_576,
                max_bytes: None
            })
        );

        let limited = "used_memory:10\nmaxmemory:100\n";
        assert_eq!(
            parse_memory_info(limited),
            Some(MemoryInfo {
                used_bytes: 10,
                max_bytes: Some(100)
            })
        );

        assert_eq!(parse_memory_info("# Server\nredis_version:7.2.0"), None);
    }

    #[tokio::test]
    async fn test_commands_before_connect_report_not_connected() {
        let backend = RedisBackend::new(&RedisConfig::default());
        let err = backend.get("k").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotConnected));
    }
}
