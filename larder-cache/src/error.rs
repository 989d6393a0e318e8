//! Error types for cache operations.

use larder_redis::RedisError;
use larder_store::StoreError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent or expired
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The networked backend could not be reached
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// Operation exceeded its bound
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Embedded backend read, write or GC failure
    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    /// The server rejected a command
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid glob pattern
    #[error("Invalid pattern: {0}")]
    Pattern(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether this is an absent or expired key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_))
    }

    /// Log at the level this kind of failure deserves and pass it on.
    pub(crate) fn logged(self, operation: &'static str, key: &str) -> Self {
        match &self {
            Self::NotFound(_) => debug!(operation, key, "Cache miss"),
            Self::Connectivity(_) | Self::Timeout(_) => {
                warn!(operation, key, error = %self, "Cache backend unavailable")
            }
            Self::StorageIo(_) => error!(operation, key, error = %self, "Cache storage failure"),
            _ => debug!(operation, key, error = %self, "Cache operation failed"),
        }
        self
    }
}

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::Connection(msg) => Self::Connectivity(msg),
            RedisError::CheckoutTimeout(d) | RedisError::Timeout(d) => Self::Timeout(d),
            RedisError::Command(msg) => Self::Backend(msg),
            RedisError::Config(msg) => Self::Config(msg),
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidOption(msg) => Self::Config(msg),
            other => Self::StorageIo(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::StorageIo(format!("storage task failed: {}", err))
    }
}

impl From<globset::Error> for CacheError {
    fn from(err: globset::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_error_mapping() {
        let timeout = Duration::from_secs(5);
        assert!(matches!(
            CacheError::from(RedisError::Connection("refused".into())),
            CacheError::Connectivity(_)
        ));
        assert!(matches!(
            CacheError::from(RedisError::CheckoutTimeout(timeout)),
            CacheError::Timeout(d) if d == timeout
        ));
        assert!(matches!(
            CacheError::from(RedisError::Command("WRONGTYPE".into())),
            CacheError::Backend(_)
        ));
    }

    #[test]
    fn test_store_error_mapping() {
        let err = CacheError::from(StoreError::Closed);
        assert!(matches!(err, CacheError::StorageIo(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_not_found_display() {
        let err = CacheError::NotFound("user:1".to_string());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Key not found: user:1");
    }
}
