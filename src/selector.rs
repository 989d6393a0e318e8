//! Startup-time backend selection.

use crate::config::AppConfig;
use crate::error::LarderResult;
use larder_cache::{BackendKind, CacheError, CacheHandle, EmbeddedCache, RedisCache};
use larder_redis::RedisPool;
use tracing::info;

/// Backends built from configuration, before anything is scheduled.
#[derive(Clone)]
pub struct Backends {
    pub cache: CacheHandle,
    /// Set when the cache or the session store uses Redis.
    pub redis: Option<RedisPool>,
}

/// Picks and constructs the cache backend once per process.
pub struct CacheSelector;

impl CacheSelector {
    /// Build the configured backend.
    ///
    /// The Redis pool is created if either the cache or the session store
    /// needs it, and the cache reuses that same pool. The embedded store is
    /// opened under [`AppConfig::storage_dir`].
    pub async fn select(config: &AppConfig) -> LarderResult<Backends> {
        let redis = if config.needs_redis() {
            Some(RedisPool::new(config.redis.clone()).await?)
        } else {
            None
        };

        let cache_config = config.cache_config()?;
        let cache = match (config.cache, &redis) {
            (BackendKind::Redis, Some(pool)) => {
                CacheHandle::from(RedisCache::new(pool.clone(), cache_config))
            }
            (BackendKind::Embedded, _) => {
                let dir = config.storage_dir();
                let cache = tokio::task::spawn_blocking(move || EmbeddedCache::open(dir, cache_config))
                    .await
                    .map_err(CacheError::from)??;
                CacheHandle::from(cache)
            }
            _ => CacheHandle::Disabled,
        };

        info!(
            backend = %cache.backend_kind(),
            redis_pool = redis.is_some(),
            prefix = config.key_prefix.as_deref().unwrap_or(""),
            "Cache backend selected"
        );

        Ok(Backends { cache, redis })
    }
}
