//! The process-wide cache handle.

use crate::config::BackendKind;
use crate::embedded_cache::EmbeddedCache;
use crate::error::{CacheError, CacheResult};
use crate::pattern::KeyPattern;
use crate::redis_cache::RedisCache;
use crate::traits::Cache;
use async_trait::async_trait;

/// Whichever backend was selected at startup.
///
/// `Disabled` accepts writes and discards them; every read misses.
#[derive(Clone, Default)]
pub enum CacheHandle {
    Redis(RedisCache),
    Embedded(EmbeddedCache),
    #[default]
    Disabled,
}

impl CacheHandle {
    /// The backend behind this handle.
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            Self::Redis(_) => BackendKind::Redis,
            Self::Embedded(_) => BackendKind::Embedded,
            Self::Disabled => BackendKind::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// The embedded cache, if that is the selected backend.
    pub fn as_embedded(&self) -> Option<&EmbeddedCache> {
        match self {
            Self::Embedded(cache) => Some(cache),
            _ => None,
        }
    }

    /// The Redis cache, if that is the selected backend.
    pub fn as_redis(&self) -> Option<&RedisCache> {
        match self {
            Self::Redis(cache) => Some(cache),
            _ => None,
        }
    }
}

impl From<RedisCache> for CacheHandle {
    fn from(cache: RedisCache) -> Self {
        Self::Redis(cache)
    }
}

impl From<EmbeddedCache> for CacheHandle {
    fn from(cache: EmbeddedCache) -> Self {
        Self::Embedded(cache)
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CacheHandle")
            .field(&self.backend_kind())
            .finish()
    }
}

#[async_trait]
impl Cache for CacheHandle {
    async fn has(&self, key: &str) -> CacheResult<bool> {
        match self {
            Self::Redis(cache) => cache.has(key).await,
            Self::Embedded(cache) => cache.has(key).await,
            Self::Disabled => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        match self {
            Self::Redis(cache) => cache.get(key).await,
            Self::Embedded(cache) => cache.get(key).await,
            Self::Disabled => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        match self {
            Self::Redis(cache) => cache.set(key, value, ttl_seconds).await,
            Self::Embedded(cache) => cache.set(key, value, ttl_seconds).await,
            Self::Disabled => Ok(()),
        }
    }

    async fn forget(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::Redis(cache) => cache.forget(key).await,
            Self::Embedded(cache) => cache.forget(key).await,
            Self::Disabled => Ok(()),
        }
    }

    async fn empty_by_match(&self, pattern: &str) -> CacheResult<()> {
        match self {
            Self::Redis(cache) => cache.empty_by_match(pattern).await,
            Self::Embedded(cache) => cache.empty_by_match(pattern).await,
            // Still reject patterns the real backends would refuse.
            Self::Disabled => KeyPattern::new(pattern).map(|_| ()),
        }
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        match self {
            Self::Redis(cache) => cache.keys(pattern).await,
            Self::Embedded(cache) => cache.keys(pattern).await,
            Self::Disabled => KeyPattern::new(pattern).map(|_| Vec::new()),
        }
    }
}
