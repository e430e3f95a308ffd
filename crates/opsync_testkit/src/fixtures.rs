//! Storage fixtures and repository helpers.
//!
//! Provides temporary storage that survives a simulated restart and
//! shortcuts for building a repository around a [`ScriptedExecutor`].

use crate::executor::ScriptedExecutor;
use crate::operations::TestOperation;
use opsync_core::{ExecutorRegistry, NewRecordsState, OperationRepo, OperationRepoConfig};
use opsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// File storage in a temporary directory, removed on drop.
pub struct TempStorage {
    /// The backend.
    pub backend: Arc<FileBackend>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TempStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open(temp_dir.path()).expect("Failed to open file backend");
        Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        }
    }

    /// The backend as a trait object.
    pub fn shared(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    /// Opens a second, independent backend on the same directory, as a
    /// restarted process would.
    pub fn reopen(&self) -> Arc<dyn StorageBackend> {
        Arc::new(FileBackend::open(self.path()).expect("Failed to reopen file backend"))
    }

    /// The storage directory.
    pub fn path(&self) -> &Path {
        self._temp_dir.path()
    }
}

impl Default for TempStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory storage as a trait object.
pub fn memory_storage() -> Arc<dyn StorageBackend> {
    Arc::new(InMemoryBackend::new())
}

/// Repository timings short enough for real-time tests.
///
/// Paused-clock tests can keep the defaults.
pub fn fast_repo_config() -> OperationRepoConfig {
    OperationRepoConfig::new()
        .with_execution_interval(Duration::from_millis(10))
        .with_post_wake_delay(Duration::from_millis(1))
        .with_default_fail_retry_backoff(Duration::from_millis(10))
        .with_post_create_delay(Duration::ZERO)
        .with_post_create_retry_up_to(Duration::from_millis(50))
}

/// A repository whose only executor is `executor`, with default timings.
pub fn test_repo(
    executor: Arc<ScriptedExecutor>,
    storage: Option<Arc<dyn StorageBackend>>,
) -> OperationRepo<TestOperation> {
    test_repo_with_config(executor, storage, OperationRepoConfig::default())
}

/// A repository whose only executor is `executor`.
pub fn test_repo_with_config(
    executor: Arc<ScriptedExecutor>,
    storage: Option<Arc<dyn StorageBackend>>,
    config: OperationRepoConfig,
) -> OperationRepo<TestOperation> {
    let new_records = Arc::new(NewRecordsState::from_config(&config));
    let registry = ExecutorRegistry::<TestOperation>::new()
        .with(executor)
        .expect("Failed to register executor");
    OperationRepo::new(config, registry, storage, new_records)
}
