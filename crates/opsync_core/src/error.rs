//! Error types for the sync core.

use thiserror::Error;

/// Result type for sync core operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync core.
///
/// None of these escape the execution loop; they surface from constructors,
/// explicit persistence calls and registry wiring.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] opsync_storage::StorageError),

    /// Persisted state could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Two executors claimed the same operation kind.
    #[error("operation kind {kind} already has a registered executor")]
    DuplicateExecutor {
        /// The contested kind.
        kind: String,
    },

    /// No executor handles the operation kind.
    #[error("no executor registered for operation kind {kind}")]
    MissingExecutor {
        /// The unhandled kind.
        kind: String,
    },

    /// A persisted model is not shaped as a property map.
    #[error("invalid model in store {store}: {message}")]
    InvalidModel {
        /// Store name.
        store: String,
        /// Description of the problem.
        message: String,
    },

    /// The repository loop is not running.
    #[error("operation repository has shut down")]
    Shutdown,
}

impl SyncError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }
}
