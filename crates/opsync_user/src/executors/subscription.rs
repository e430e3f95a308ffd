use super::{unexpected_head, ExecutorContext};
use crate::backend::SubscriptionObject;
use crate::error::{BackendError, ResponseStatusType};
use crate::operations::{UserOperation, UserOperationKind};
use async_trait::async_trait;
use opsync_core::{
    ExecutionResponse, ExecutionResult, ModelChangeTag, OperationExecutor, TypedModel,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Creates, updates, deletes and transfers subscriptions.
pub struct SubscriptionExecutor {
    context: ExecutorContext,
}

impl SubscriptionExecutor {
    /// Creates the executor.
    pub fn new(context: ExecutorContext) -> Self {
        Self { context }
    }

    async fn create(
        &self,
        head: &UserOperation,
        operations: &[UserOperation],
    ) -> ExecutionResponse<UserOperation> {
        if operations
            .iter()
            .any(|o| matches!(o, UserOperation::DeleteSubscription { .. }))
        {
            debug!("subscription deleted before it was created");
            return ExecutionResponse::success();
        }
        let Some(mut subscription) = subscription_object(head) else {
            return unexpected_head("subscription", Some(head));
        };
        for update in &operations[1..] {
            if let Some(updated) = subscription_object(update) {
                subscription.enabled = updated.enabled;
                subscription.address = updated.address;
                subscription.status = updated.status;
            }
        }

        let local_id = subscription.id.clone();
        let result = self
            .context
            .backend
            .create_subscription(head.app_id(), head.onesignal_id(), subscription)
            .await;
        match result {
            Ok(Some(backend_id)) => {
                info!(subscription_id = %backend_id, "subscription created");
                if let Some(model) = self.context.stores.subscriptions.get(&local_id) {
                    model
                        .model()
                        .set("id", backend_id.as_str(), ModelChangeTag::Hydrate);
                }
                ExecutionResponse::success()
                    .with_id_translations(HashMap::from([(local_id, backend_id)]))
            }
            Ok(None) => ExecutionResponse::success(),
            Err(err) => self.fail(&err, head),
        }
    }

    async fn update(
        &self,
        head: &UserOperation,
        last: &UserOperation,
    ) -> ExecutionResponse<UserOperation> {
        let Some(subscription) = subscription_object(last) else {
            return unexpected_head("subscription", Some(head));
        };
        let subscription_id = subscription.id.clone();
        let result = self
            .context
            .backend
            .update_subscription(head.app_id(), &subscription_id, subscription.clone())
            .await;
        match result {
            Ok(()) => ExecutionResponse::success(),
            Err(err) if err.status_type() == ResponseStatusType::Missing => {
                if self
                    .context
                    .new_records
                    .is_in_missing_retry_window(&subscription_id)
                {
                    return ExecutionResponse::new(ExecutionResult::FailRetry)
                        .with_retry_after(err.retry_after_seconds);
                }
                debug!(subscription_id = %subscription_id, "subscription missing, recreating");
                let recreate = UserOperation::CreateSubscription {
                    app_id: head.app_id().to_string(),
                    onesignal_id: head.onesignal_id().to_string(),
                    subscription_id,
                    subscription_type: subscription.subscription_type,
                    enabled: subscription.enabled,
                    address: subscription.address,
                    status: subscription.status,
                };
                ExecutionResponse::new(ExecutionResult::FailNoRetry).with_operations(vec![recreate])
            }
            Err(err) => self.fail(&err, head),
        }
    }

    fn fail(&self, err: &BackendError, head: &UserOperation) -> ExecutionResponse<UserOperation> {
        match err.status_type() {
            ResponseStatusType::Missing
                if head
                    .subscription_id()
                    .is_some_and(|sid| self.context.new_records.is_in_missing_retry_window(sid)) =>
            {
                ExecutionResponse::new(ExecutionResult::FailRetry)
                    .with_retry_after(err.retry_after_seconds)
            }
            _ => self.context.failure("subscription", err, head.onesignal_id()),
        }
    }
}

fn subscription_object(operation: &UserOperation) -> Option<SubscriptionObject> {
    match operation {
        UserOperation::CreateSubscription {
            subscription_id,
            subscription_type,
            enabled,
            address,
            status,
            ..
        }
        | UserOperation::UpdateSubscription {
            subscription_id,
            subscription_type,
            enabled,
            address,
            status,
            ..
        } => Some(SubscriptionObject {
            id: subscription_id.clone(),
            subscription_type: *subscription_type,
            address: address.clone(),
            enabled: *enabled,
            status: *status,
        }),
        _ => None,
    }
}

#[async_trait]
impl OperationExecutor<UserOperation> for SubscriptionExecutor {
    fn operations(&self) -> Vec<UserOperationKind> {
        vec![
            UserOperationKind::CreateSubscription,
            UserOperationKind::UpdateSubscription,
            UserOperationKind::DeleteSubscription,
            UserOperationKind::TransferSubscription,
        ]
    }

    async fn execute(&self, operations: Vec<UserOperation>) -> ExecutionResponse<UserOperation> {
        let (Some(head), Some(last)) = (operations.first(), operations.last()) else {
            return unexpected_head("subscription", None);
        };
        match head {
            UserOperation::CreateSubscription { .. } => self.create(head, &operations).await,
            UserOperation::UpdateSubscription { .. } => self.update(head, last).await,
            UserOperation::DeleteSubscription {
                app_id,
                subscription_id,
                ..
            } => match self
                .context
                .backend
                .delete_subscription(app_id, subscription_id)
                .await
            {
                Ok(()) => ExecutionResponse::success(),
                Err(err) if err.status_type() == ResponseStatusType::Missing => {
                    debug!(subscription_id = %subscription_id, "subscription already deleted");
                    ExecutionResponse::success()
                }
                Err(err) => self.fail(&err, head),
            },
            UserOperation::TransferSubscription {
                app_id,
                subscription_id,
                onesignal_id,
            } => match self
                .context
                .backend
                .transfer_subscription(app_id, subscription_id, onesignal_id)
                .await
            {
                Ok(()) => ExecutionResponse::success(),
                Err(err) => self.fail(&err, head),
            },
            other => unexpected_head("subscription", Some(other)),
        }
    }
}
