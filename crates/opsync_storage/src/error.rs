//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key cannot be used as a storage name.
    #[error("invalid storage key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why the key was rejected.
        reason: &'static str,
    },

    /// The atomic replace of a blob failed.
    #[error("failed to persist {key}: {source}")]
    Persist {
        /// The key being written.
        key: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The storage directory is missing or not a directory.
    #[error("storage directory unavailable: {0}")]
    Unavailable(String),
}
