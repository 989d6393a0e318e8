//! Error types for the embedded store.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Embedded store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// On-disk data failed validation.
    #[error("Corrupt segment {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Another handle (possibly another process) owns the directory.
    #[error("Store directory is locked by another handle: {0}")]
    Locked(PathBuf),

    /// Record encoding failed.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Value-log GC found no segment worth rewriting.
    #[error("Value-log GC found nothing to rewrite")]
    NoRewrite,

    /// A GC pass is already running on this store.
    #[error("Value-log GC already in progress")]
    GcInProgress,

    /// Invalid option or argument.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
