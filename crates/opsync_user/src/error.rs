//! Error types for the user domain.

use opsync_core::SyncError;
use std::fmt;
use thiserror::Error;

/// Result type for user domain calls.
pub type UserResult<T> = Result<T, UserError>;

/// Errors surfaced by the user runtime and manager.
#[derive(Error, Debug)]
pub enum UserError {
    /// Error from the sync core.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage error while opening the runtime.
    #[error("storage error: {0}")]
    Storage(#[from] opsync_storage::StorageError),

    /// An argument was rejected before anything was queued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// How a backend failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatusType {
    /// Network trouble, throttling or a server error.
    Retryable,
    /// The request itself was rejected.
    Invalid,
    /// Credentials were rejected.
    Unauthorized,
    /// The target record does not exist (yet).
    Missing,
    /// The request conflicts with backend state.
    Conflict,
}

impl ResponseStatusType {
    /// Classifies an HTTP status; `None` means no response was received.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None | Some(429) => ResponseStatusType::Retryable,
            Some(s) if (500..600).contains(&s) => ResponseStatusType::Retryable,
            Some(401) | Some(403) => ResponseStatusType::Unauthorized,
            Some(404) | Some(410) => ResponseStatusType::Missing,
            Some(409) => ResponseStatusType::Conflict,
            Some(_) => ResponseStatusType::Invalid,
        }
    }
}

/// A failed backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// HTTP status, `None` if no response arrived.
    pub status_code: Option<u16>,
    /// Error description.
    pub message: String,
    /// Backend-requested wait before retrying.
    pub retry_after_seconds: Option<u64>,
}

impl BackendError {
    /// Creates an error for an HTTP status.
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Creates an error for a call that got no response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Attaches a retry-after hint.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Classifies the failure.
    pub fn status_type(&self) -> ResponseStatusType {
        ResponseStatusType::from_status(self.status_code)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "backend returned {code}: {}", self.message),
            None => write!(f, "backend unreachable: {}", self.message),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        use ResponseStatusType::*;
        let cases = [
            (None, Retryable),
            (Some(429), Retryable),
            (Some(500), Retryable),
            (Some(503), Retryable),
            (Some(400), Invalid),
            (Some(402), Invalid),
            (Some(401), Unauthorized),
            (Some(403), Unauthorized),
            (Some(404), Missing),
            (Some(410), Missing),
            (Some(409), Conflict),
        ];
        for (status, expected) in cases {
            assert_eq!(ResponseStatusType::from_status(status), expected, "{status:?}");
        }
    }

    #[test]
    fn display_and_retry_after() {
        let err = BackendError::new(429, "slow down").with_retry_after(60);
        assert_eq!(err.to_string(), "backend returned 429: slow down");
        assert_eq!(err.retry_after_seconds, Some(60));
        assert_eq!(err.status_type(), ResponseStatusType::Retryable);
        assert_eq!(
            BackendError::network("timeout").to_string(),
            "backend unreachable: timeout"
        );
    }
}
