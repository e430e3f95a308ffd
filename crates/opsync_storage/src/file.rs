//! File-based storage backend for persistent storage.

use crate::backend::{validate_key, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File extension used for every stored blob.
const BLOB_EXTENSION: &str = "json";

/// A directory-based storage backend.
///
/// Every key is stored as `<dir>/<key>.json`. Data survives process
/// restarts.
///
/// # Durability
///
/// `write` stages the blob in a temporary file inside the same directory,
/// calls `sync_all` on it and renames it over the target. A process kill at
/// any point leaves either the previous blob or the new one.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. Writers are
/// serialized so two stores never race on the same rename.
///
/// # Example
///
/// ```no_run
/// use opsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("sdk-state")).unwrap();
/// backend.write("operations", b"[]").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens a backend rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `dir` exists
    /// but is not a directory.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Opens an existing backend without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if `dir` is not an existing
    /// directory.
    pub fn open_existing(dir: &Path) -> StorageResult<Self> {
        if !dir.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "no storage directory at {}",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BLOB_EXTENSION}"))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.blob_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;
        staged
            .persist(self.blob_path(key))
            .map_err(|e| StorageError::Persist {
                key: key.to_string(),
                source: e.error,
            })?;

        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
