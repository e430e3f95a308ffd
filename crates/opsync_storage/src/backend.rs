//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// Longest key accepted by [`validate_key`].
const MAX_KEY_LEN: usize = 128;

/// A keyed blob store for opsync state.
///
/// Each key holds one opaque blob. Model stores persist their whole content
/// under their store name and the operation queue persists under its own key,
/// so every write is a full replacement.
///
/// # Invariants
///
/// - `write` is atomic: after a crash a reader sees either the previous or
///   the new blob, never a torn mix
/// - `write` is durable once it returns `Ok`
/// - `read` returns exactly the bytes last written for that key
/// - Backends must be `Send + Sync`; all methods take `&self`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the blob stored under `key`, or `None` if nothing was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the blob cannot be made
    /// durable.
    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob stored under `key`. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Lists every key currently holding a blob, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Checks that `key` is usable by every backend.
///
/// Keys are non-empty, at most 128 bytes, and limited to ASCII letters,
/// digits, `-`, `_` and `.` (not leading).
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first violation.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.len() > MAX_KEY_LEN {
        return invalid("key is longer than 128 bytes");
    }
    if key.starts_with('.') {
        return invalid("key starts with '.'");
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return invalid("key contains characters outside [A-Za-z0-9._-]");
    }
    Ok(())
}
