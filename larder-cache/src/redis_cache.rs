//! Redis cache implementation.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::pattern::KeyPattern;
use crate::traits::Cache;
use async_trait::async_trait;
use larder_redis::{RedisPool, redis};
use tracing::debug;

/// Keys requested per `SCAN` step.
const SCAN_COUNT: usize = 1000;

/// Keys removed per `DEL`.
const DELETE_BATCH: usize = 500;

/// Redis cache store.
///
/// Every command checks a connection out of the shared pool and runs under
/// the pool's per-command timeout.
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
    config: CacheConfig,
}

impl RedisCache {
    /// Create a cache over an existing pool.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use larder_cache::*;
    /// use larder_redis::{RedisConfig, RedisPool};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let pool = RedisPool::new(RedisConfig::new("localhost:6379")).await?;
    ///     let cache = RedisCache::new(pool, CacheConfig::new().with_key_prefix("app")?);
    ///     cache.set("greeting", b"hello", 60).await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn new(pool: RedisPool, config: CacheConfig) -> Self {
        Self { pool, config }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Physical keys in this namespace matching `pattern`.
    async fn scan(&self, pattern: &KeyPattern) -> CacheResult<Vec<String>> {
        let physical = self.config.physical_pattern(pattern);
        let mut conn = self.pool.get().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = conn
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&physical)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn has(&self, key: &str) -> CacheResult<bool> {
        let physical = self.config.build_key(key);
        let result: CacheResult<i64> = async {
            let mut conn = self.pool.get().await?;
            Ok(conn.query(redis::cmd("EXISTS").arg(&physical)).await?)
        }
        .await;
        result.map(|n| n > 0).map_err(|e| e.logged("has", key))
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let physical = self.config.build_key(key);
        let result: CacheResult<Option<Vec<u8>>> = async {
            let mut conn = self.pool.get().await?;
            Ok(conn.query(redis::cmd("GET").arg(&physical)).await?)
        }
        .await;
        match result {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(CacheError::NotFound(key.to_string()).logged("get", key)),
            Err(e) => Err(e.logged("get", key)),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        let physical = self.config.build_key(key);
        let mut cmd = redis::cmd("SET");
        cmd.arg(&physical).arg(value);
        if ttl_seconds > 0 {
            cmd.arg("EX").arg(ttl_seconds);
        }

        let result: CacheResult<()> = async {
            let mut conn = self.pool.get().await?;
            let _: () = conn.query(&cmd).await?;
            Ok(())
        }
        .await;
        result.map_err(|e| e.logged("set", key))
    }

    async fn forget(&self, key: &str) -> CacheResult<()> {
        let physical = self.config.build_key(key);
        let result: CacheResult<()> = async {
            let mut conn = self.pool.get().await?;
            let _: i64 = conn.query(redis::cmd("DEL").arg(&physical)).await?;
            Ok(())
        }
        .await;
        result.map_err(|e| e.logged("forget", key))
    }

    async fn empty_by_match(&self, pattern: &str) -> CacheResult<()> {
        let compiled = KeyPattern::new(pattern)?;
        let result: CacheResult<usize> = async {
            let keys = self.scan(&compiled).await?;
            let mut removed = 0usize;
            let mut conn = self.pool.get().await?;
            for batch in keys.chunks(DELETE_BATCH) {
                let n: usize = conn.query(redis::cmd("DEL").arg(batch)).await?;
                removed += n;
            }
            Ok(removed)
        }
        .await;

        let removed = result.map_err(|e| e.logged("empty_by_match", pattern))?;
        debug!(pattern, removed, "Removed matching Redis keys");
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let compiled = KeyPattern::new(pattern)?;
        let physical = self
            .scan(&compiled)
            .await
            .map_err(|e| e.logged("keys", pattern))?;

        let mut keys: Vec<String> = physical
            .iter()
            .filter_map(|key| self.config.strip_key(key))
            .map(str::to_string)
            .collect();
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}
