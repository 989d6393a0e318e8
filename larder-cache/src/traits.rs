//! Cache trait definition.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;

/// Uniform contract over every cache backend.
///
/// Keys are logical: any namespace prefix is applied and stripped by the
/// implementation.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Check if a live, unexpired entry exists.
    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// Get the stored payload.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>>;

    /// Store `value` under `key`, replacing any existing entry and its expiry.
    ///
    /// `ttl_seconds == 0` means the entry never expires.
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()>;

    /// Remove one entry. Removing an absent key is not an error.
    async fn forget(&self, key: &str) -> CacheResult<()>;

    /// Remove every key in this namespace matching a glob pattern.
    ///
    /// The match set is a snapshot; keys written concurrently may survive.
    async fn empty_by_match(&self, pattern: &str) -> CacheResult<()>;

    /// Remove every key in this namespace.
    ///
    /// Keys of other namespaces sharing the backend are left alone.
    async fn empty(&self) -> CacheResult<()> {
        self.empty_by_match("*").await
    }

    /// List logical keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    // ========== Batch Operations (Parallel) ==========

    /// Get multiple keys concurrently.
    ///
    /// Results are in input order; absent keys map to `None`.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let futures = keys.iter().map(|key| async move {
            match self.get(key).await {
                Ok(value) => Ok(Some(value)),
                Err(CacheError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        });
        try_join_all(futures).await
    }

    /// Remove multiple keys concurrently.
    async fn forget_many(&self, keys: &[&str]) -> CacheResult<()> {
        let futures = keys.iter().map(|key| self.forget(key));
        try_join_all(futures).await?;
        Ok(())
    }
}

/// Typed helpers available on every [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    /// Get a value stored as JSON.
    async fn get_json<T>(&self, key: &str) -> CacheResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    /// Store a value as JSON.
    async fn set_json<T>(&self, key: &str, value: &T, ttl_seconds: u64) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, &bytes, ttl_seconds).await
    }

    /// Get a UTF-8 string.
    async fn get_string(&self, key: &str) -> CacheResult<String> {
        let bytes = self.get(key).await?;
        String::from_utf8(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    /// Store a UTF-8 string.
    async fn set_string(&self, key: &str, value: &str, ttl_seconds: u64) -> CacheResult<()> {
        self.set(key, value.as_bytes(), ttl_seconds).await
    }

    /// Get a cached value, or compute, store and return it.
    ///
    /// A cached payload that no longer decodes is recomputed and overwritten.
    async fn remember<T, F, Fut>(&self, key: &str, ttl_seconds: u64, factory: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResult<T>> + Send,
    {
        match self.get_json(key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::NotFound(_)) | Err(CacheError::Deserialization(_)) => {}
            Err(e) => return Err(e),
        }

        let value = factory().await?;
        self.set_json(key, &value, ttl_seconds).await?;
        Ok(value)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
