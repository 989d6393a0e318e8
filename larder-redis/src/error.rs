//! Redis pool error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for Redis pool operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Redis pool errors.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Dialing or probing a connection failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No connection could be checked out within the connection timeout.
    #[error("Timed out waiting for a pooled connection after {0:?}")]
    CheckoutTimeout(Duration),

    /// A command did not complete within the command timeout.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected a command.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RedisError {
    /// Check if this error is transient and worth retrying by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::CheckoutTimeout(_)
        )
    }

    /// Check if this error indicates connection loss.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if this error is any kind of timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::CheckoutTimeout(_))
    }
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}
