//! A user runtime over the mock backend.

use crate::fixtures::TempStorage;
use opsync_core::OperationRepoConfig;
use opsync_user::{MockUserBackend, UserSyncConfig, UserSyncRuntime};
use std::sync::Arc;

/// App id used by the harness.
pub const TEST_APP_ID: &str = "test-app";

/// A running [`UserSyncRuntime`] on temporary file storage.
///
/// The backend outlives restarts, so a restarted runtime talks to the
/// same mock users.
pub struct UserHarness {
    /// The storage directory.
    pub storage: TempStorage,
    /// The mock backend.
    pub backend: Arc<MockUserBackend>,
    /// The running runtime.
    pub runtime: UserSyncRuntime,
    config: OperationRepoConfig,
}

impl UserHarness {
    /// Starts a runtime with default timings on empty storage.
    pub fn start() -> Self {
        Self::start_with_config(OperationRepoConfig::default())
    }

    /// Starts a runtime with `config` on empty storage.
    pub fn start_with_config(config: OperationRepoConfig) -> Self {
        let storage = TempStorage::new();
        let backend = Arc::new(MockUserBackend::new());
        let runtime = Self::runtime(&storage, &backend, &config);
        Self {
            storage,
            backend,
            runtime,
            config,
        }
    }

    /// Stops the runtime and starts a new one on the same storage, as a
    /// process restart would.
    pub fn restart(self) -> Self {
        self.runtime.shutdown();
        let runtime = Self::runtime(&self.storage, &self.backend, &self.config);
        Self { runtime, ..self }
    }

    fn runtime(
        storage: &TempStorage,
        backend: &Arc<MockUserBackend>,
        config: &OperationRepoConfig,
    ) -> UserSyncRuntime {
        let sync_config =
            UserSyncConfig::new(TEST_APP_ID, storage.reopen()).with_repo_config(config.clone());
        UserSyncRuntime::start(sync_config, backend.clone()).expect("Failed to start runtime")
    }
}
