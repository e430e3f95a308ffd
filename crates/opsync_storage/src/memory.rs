//! In-memory storage backend for testing.

use crate::backend::{validate_key, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory storage backend.
///
/// This backend stores all blobs in memory and is suitable for:
/// - Unit tests
/// - Integration tests that simulate a restart by handing the same backend
///   to a fresh set of stores
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use opsync_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("operations", b"[]").unwrap();
/// assert_eq!(backend.keys().unwrap(), vec!["operations".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with blobs.
    ///
    /// Useful for testing startup recovery from a known persisted state.
    #[must_use]
    pub fn with_blobs<I, K>(blobs: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            blobs: RwLock::new(blobs.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Clears all blobs from the backend.
    pub fn clear(&self) {
        self.blobs.write().clear();
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.read().get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.blobs.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.blobs.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.blobs.read().keys().cloned().collect())
    }
}
