//! Executors performing user operations against a [`UserBackend`].
//!
//! Every executor maps backend failures onto the queue's result taxonomy;
//! the shared part of that mapping lives in [`ExecutorContext::failure`].

mod identity;
mod login;
mod refresh;
mod subscription;
mod update_user;

pub use identity::IdentityExecutor;
pub use login::LoginUserExecutor;
pub use refresh::RefreshUserExecutor;
pub use subscription::SubscriptionExecutor;
pub use update_user::UpdateUserExecutor;

use crate::backend::UserBackend;
use crate::error::{BackendError, ResponseStatusType};
use crate::models::UserStores;
use crate::operations::UserOperation;
use crate::rebuild::RebuildUserService;
use opsync_core::{
    ExecutionResponse, ExecutionResult, ExecutorRegistry, NewRecordsState, SyncResult,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collaborators shared by all user executors.
#[derive(Clone)]
pub struct ExecutorContext {
    /// Remote API.
    pub backend: Arc<dyn UserBackend>,
    /// Local models hydrated from responses.
    pub stores: UserStores,
    /// Records the backend created recently.
    pub new_records: Arc<NewRecordsState>,
    /// Recreates a user the backend lost.
    pub rebuild: RebuildUserService,
}

impl ExecutorContext {
    /// Bundles the collaborators.
    pub fn new(
        app_id: &str,
        backend: Arc<dyn UserBackend>,
        stores: UserStores,
        new_records: Arc<NewRecordsState>,
    ) -> Self {
        Self {
            backend,
            rebuild: RebuildUserService::new(app_id, stores.clone()),
            stores,
            new_records,
        }
    }

    /// Default handling of a failed call about the user `onesignal_id`.
    ///
    /// A missing user that was created moments ago is retried; otherwise it
    /// is dropped and, if it is still the current user, rebuilt.
    pub(crate) fn failure(
        &self,
        operation: &str,
        err: &BackendError,
        onesignal_id: &str,
    ) -> ExecutionResponse<UserOperation> {
        warn!(operation, error = %err, "backend call failed");
        match err.status_type() {
            ResponseStatusType::Retryable => ExecutionResponse::new(ExecutionResult::FailRetry)
                .with_retry_after(err.retry_after_seconds),
            ResponseStatusType::Unauthorized => {
                ExecutionResponse::new(ExecutionResult::FailUnauthorized)
                    .with_retry_after(err.retry_after_seconds)
            }
            ResponseStatusType::Missing
                if self.new_records.is_in_missing_retry_window(onesignal_id) =>
            {
                debug!(onesignal_id, "user not visible yet, retrying");
                ExecutionResponse::new(ExecutionResult::FailRetry)
                    .with_retry_after(err.retry_after_seconds)
            }
            ResponseStatusType::Missing => {
                let response = ExecutionResponse::new(ExecutionResult::FailNoRetry);
                match self.rebuild.rebuild_operations(onesignal_id) {
                    Some(operations) => response.with_operations(operations),
                    None => response,
                }
            }
            ResponseStatusType::Invalid | ResponseStatusType::Conflict => {
                ExecutionResponse::new(ExecutionResult::FailNoRetry)
            }
        }
    }
}

/// Registry with every user executor.
///
/// # Errors
///
/// Returns an error if two executors claim the same operation kind.
pub fn user_executors(context: &ExecutorContext) -> SyncResult<ExecutorRegistry<UserOperation>> {
    ExecutorRegistry::new()
        .with(Arc::new(LoginUserExecutor::new(context.clone())))?
        .with(Arc::new(RefreshUserExecutor::new(context.clone())))?
        .with(Arc::new(UpdateUserExecutor::new(context.clone())))?
        .with(Arc::new(IdentityExecutor::new(context.clone())))?
        .with(Arc::new(SubscriptionExecutor::new(context.clone())))
}

/// Response for a batch whose head has an unexpected kind.
pub(crate) fn unexpected_head(
    executor: &str,
    head: Option<&UserOperation>,
) -> ExecutionResponse<UserOperation> {
    tracing::error!(
        executor,
        operation = ?head.map(|o| opsync_core::Operation::kind(o)),
        "executor received an operation it does not handle"
    );
    ExecutionResponse::new(ExecutionResult::FailNoRetry)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backend::MockUserBackend;
    use crate::models::{IdentityModel, PropertiesModel};
    use opsync_core::ModelChangeTag;
    use std::time::Duration;

    pub(crate) fn context_for(user: &str) -> (ExecutorContext, Arc<MockUserBackend>) {
        let backend = Arc::new(MockUserBackend::new());
        let stores = UserStores::in_memory();
        stores
            .identity
            .replace(&IdentityModel::new(user, None), ModelChangeTag::Hydrate);
        stores
            .properties
            .replace(&PropertiesModel::new(user), ModelChangeTag::Hydrate);
        let new_records = Arc::new(NewRecordsState::new(
            Duration::from_secs(5),
            Duration::from_secs(60),
        ));
        let context = ExecutorContext::new("app", backend.clone(), stores, new_records);
        (context, backend)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::context_for;
    use super::*;
    use crate::operations::UserOperationKind;

    #[test]
    fn registry_covers_every_kind() {
        let (context, _) = context_for("R1");
        let registry = user_executors(&context).unwrap();
        for kind in [
            UserOperationKind::LoginUser,
            UserOperationKind::RefreshUser,
            UserOperationKind::SetAlias,
            UserOperationKind::DeleteAlias,
            UserOperationKind::SetTag,
            UserOperationKind::DeleteTag,
            UserOperationKind::SetProperty,
            UserOperationKind::TrackSessionStart,
            UserOperationKind::TrackSessionEnd,
            UserOperationKind::CreateSubscription,
            UserOperationKind::UpdateSubscription,
            UserOperationKind::DeleteSubscription,
            UserOperationKind::TransferSubscription,
        ] {
            assert!(registry.resolve(kind).is_ok(), "{kind}");
        }
    }

    #[test]
    fn missing_user_is_rebuilt_outside_retry_window() {
        let (context, _) = context_for("R1");
        let response = context.failure("test", &BackendError::new(404, "gone"), "R1");
        assert_eq!(response.result, ExecutionResult::FailNoRetry);
        assert!(response.operations.is_some_and(|ops| !ops.is_empty()));

        context.new_records.add("R2");
        let response = context.failure("test", &BackendError::new(404, "gone"), "R2");
        assert_eq!(response.result, ExecutionResult::FailRetry);
    }

    #[test]
    fn throttling_keeps_retry_after() {
        let (context, _) = context_for("R1");
        let err = BackendError::new(429, "slow").with_retry_after(60);
        let response = context.failure("test", &err, "R1");
        assert_eq!(response.result, ExecutionResult::FailRetry);
        assert_eq!(response.retry_after_seconds, Some(60));
    }
}
