//! Top-level error type.

use larder_cache::CacheError;
use larder_cron::CronError;
use larder_redis::RedisError;
use larder_store::StoreError;
use thiserror::Error;

/// Result type for bootstrap and shutdown.
pub type LarderResult<T> = Result<T, LarderError>;

/// Errors raised while wiring up or tearing down the cache stack.
#[derive(Debug, Error)]
pub enum LarderError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cron(#[from] CronError),
}

impl From<dotenvy::Error> for LarderError {
    fn from(err: dotenvy::Error) -> Self {
        Self::Config(format!("failed to read .env: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_errors_convert() {
        let err: LarderError = CronError::JobAlreadyExists("value-log-gc".to_string()).into();
        assert!(matches!(err, LarderError::Cron(_)));
        assert_eq!(err.to_string(), "Job already exists: value-log-gc");

        let err: LarderError = CacheError::Config("bad".to_string()).into();
        assert!(err.to_string().contains("bad"));
    }
}
