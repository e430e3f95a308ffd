//! Startup wiring of the user sync stack.

use crate::backend::UserBackend;
use crate::config::UserSyncConfig;
use crate::error::UserResult;
use crate::executors::{user_executors, ExecutorContext};
use crate::listeners::{
    IdentityModelStoreListener, PropertiesModelStoreListener, SubscriptionModelStoreListener,
};
use crate::manager::UserManager;
use crate::models::UserStores;
use crate::operations::UserOperation;
use crate::recovery::RecoverFromDroppedLoginBug;
use opsync_core::{
    bootstrap_listener, bootstrap_singleton_listener, ListenerHandle, NewRecordsState,
    OperationQueue, OperationRepo, RecoveryReport, RecoveryRunner,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running user sync stack.
///
/// Owns the stores, the operation repository with every user executor,
/// the store listeners and the startup recovery task.
pub struct UserSyncRuntime {
    stores: UserStores,
    repo: Arc<OperationRepo<UserOperation>>,
    manager: UserManager,
    listeners: Mutex<Vec<ListenerHandle>>,
    recovery: Mutex<Option<JoinHandle<RecoveryReport>>>,
}

impl UserSyncRuntime {
    /// Opens the stores and starts syncing against `backend`.
    ///
    /// The repository starts loading its persisted queue before any listener
    /// is attached. On first launch an anonymous user is created. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted store cannot be decoded.
    pub fn start(config: UserSyncConfig, backend: Arc<dyn UserBackend>) -> UserResult<Self> {
        let stores = UserStores::open(Arc::clone(&config.storage))?;
        let new_records = Arc::new(NewRecordsState::from_config(&config.repo));
        let context = ExecutorContext::new(
            &config.app_id,
            backend,
            stores.clone(),
            Arc::clone(&new_records),
        );
        let repo = Arc::new(OperationRepo::new(
            config.repo.clone(),
            user_executors(&context)?,
            Some(Arc::clone(&config.storage)),
            new_records,
        ));
        repo.start();

        let queue: Arc<dyn OperationQueue<UserOperation>> = repo.clone();
        let listeners = vec![
            bootstrap_singleton_listener(
                &stores.identity,
                IdentityModelStoreListener::new(config.app_id.clone()),
                Arc::clone(&queue),
            ),
            bootstrap_singleton_listener(
                &stores.properties,
                PropertiesModelStoreListener::new(config.app_id.clone()),
                Arc::clone(&queue),
            ),
            bootstrap_listener(
                &stores.subscriptions,
                SubscriptionModelStoreListener::new(config.app_id.clone(), stores.clone()),
                Arc::clone(&queue),
            ),
        ];

        let manager = UserManager::new(config.app_id.clone(), stores.clone(), queue);
        if stores.current_onesignal_id().is_none() {
            info!("first launch, creating anonymous user");
            manager.create_anonymous_user();
        }

        let runner = RecoveryRunner::<UserOperation>::new().with(Arc::new(
            RecoverFromDroppedLoginBug::new(config.app_id.clone(), stores.clone()),
        ));
        let recovery_repo = Arc::clone(&repo);
        let recovery = tokio::spawn(async move { runner.run(&recovery_repo).await });

        Ok(Self {
            stores,
            repo,
            manager,
            listeners: Mutex::new(listeners),
            recovery: Mutex::new(Some(recovery)),
        })
    }

    /// The user API.
    pub fn manager(&self) -> &UserManager {
        &self.manager
    }

    /// The user stores.
    pub fn stores(&self) -> &UserStores {
        &self.stores
    }

    /// The operation repository.
    pub fn repo(&self) -> &Arc<OperationRepo<UserOperation>> {
        &self.repo
    }

    /// Waits for the startup recovery checks.
    ///
    /// Returns `None` if the report was already taken or the task failed.
    pub async fn wait_for_recovery(&self) -> Option<RecoveryReport> {
        let handle = self.recovery.lock().take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "recovery task failed");
                None
            }
        }
    }

    /// Detaches the listeners and stops the execution loop.
    ///
    /// Pending operations stay persisted for the next start.
    pub fn shutdown(&self) {
        for listener in self.listeners.lock().drain(..) {
            listener.close();
        }
        if let Some(recovery) = self.recovery.lock().take() {
            recovery.abort();
        }
        self.repo.stop();
        info!("user sync stopped");
    }
}
