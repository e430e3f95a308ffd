use super::{unexpected_head, ExecutorContext};
use crate::error::ResponseStatusType;
use crate::operations::{UserOperation, UserOperationKind};
use async_trait::async_trait;
use opsync_core::{ExecutionResponse, ExecutionResult, OperationExecutor};
use std::collections::HashMap;
use tracing::debug;

/// Sets and deletes aliases.
///
/// A batch holds changes to a single label; only the last one is sent.
pub struct IdentityExecutor {
    context: ExecutorContext,
}

impl IdentityExecutor {
    /// Creates the executor.
    pub fn new(context: ExecutorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl OperationExecutor<UserOperation> for IdentityExecutor {
    fn operations(&self) -> Vec<UserOperationKind> {
        vec![UserOperationKind::SetAlias, UserOperationKind::DeleteAlias]
    }

    async fn execute(&self, operations: Vec<UserOperation>) -> ExecutionResponse<UserOperation> {
        match operations.last() {
            Some(UserOperation::SetAlias {
                app_id,
                onesignal_id,
                label,
                value,
            }) => {
                let aliases = HashMap::from([(label.clone(), value.clone())]);
                match self
                    .context
                    .backend
                    .set_aliases(app_id, onesignal_id, aliases)
                    .await
                {
                    Ok(_) => ExecutionResponse::success(),
                    Err(err) if err.status_type() == ResponseStatusType::Conflict => {
                        debug!(label = %label, "alias already claimed by another user");
                        ExecutionResponse::new(ExecutionResult::FailConflict)
                    }
                    Err(err) => self.context.failure("set-alias", &err, onesignal_id),
                }
            }
            Some(UserOperation::DeleteAlias {
                app_id,
                onesignal_id,
                label,
            }) => match self
                .context
                .backend
                .delete_alias(app_id, onesignal_id, label)
                .await
            {
                Ok(()) => ExecutionResponse::success(),
                Err(err)
                    if matches!(
                        err.status_type(),
                        ResponseStatusType::Conflict | ResponseStatusType::Missing
                    ) =>
                {
                    debug!(label = %label, "alias already gone");
                    ExecutionResponse::success()
                }
                Err(err) => self.context.failure("delete-alias", &err, onesignal_id),
            },
            other => unexpected_head("identity", other),
        }
    }
}
