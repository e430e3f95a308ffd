//! Runtime configuration.

use opsync_core::OperationRepoConfig;
use opsync_storage::StorageBackend;
use std::fmt;
use std::sync::Arc;

/// Configuration for [`crate::UserSyncRuntime`].
#[derive(Clone)]
pub struct UserSyncConfig {
    /// Application id sent with every operation.
    pub app_id: String,

    /// Storage holding the model stores and the operation queue.
    pub storage: Arc<dyn StorageBackend>,

    /// Execution loop timings.
    pub repo: OperationRepoConfig,
}

impl UserSyncConfig {
    /// Creates a configuration with default loop timings.
    #[must_use]
    pub fn new(app_id: impl Into<String>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            app_id: app_id.into(),
            storage,
            repo: OperationRepoConfig::default(),
        }
    }

    /// Sets the execution loop timings.
    #[must_use]
    pub fn with_repo_config(mut self, repo: OperationRepoConfig) -> Self {
        self.repo = repo;
        self
    }
}

impl fmt::Debug for UserSyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSyncConfig")
            .field("app_id", &self.app_id)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}
