use super::{unexpected_head, ExecutorContext};
use crate::backend::{PropertiesDeltas, PropertiesObject};
use crate::operations::{UserOperation, UserOperationKind};
use async_trait::async_trait;
use opsync_core::{ExecutionResponse, Operation, OperationExecutor};
use tracing::debug;

/// Sends tag, property and session changes as one user update.
pub struct UpdateUserExecutor {
    context: ExecutorContext,
}

impl UpdateUserExecutor {
    /// Creates the executor.
    pub fn new(context: ExecutorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl OperationExecutor<UserOperation> for UpdateUserExecutor {
    fn operations(&self) -> Vec<UserOperationKind> {
        vec![
            UserOperationKind::SetTag,
            UserOperationKind::DeleteTag,
            UserOperationKind::SetProperty,
            UserOperationKind::TrackSessionStart,
            UserOperationKind::TrackSessionEnd,
        ]
    }

    async fn execute(&self, operations: Vec<UserOperation>) -> ExecutionResponse<UserOperation> {
        let Some(head) = operations.first() else {
            return unexpected_head("update-user", None);
        };
        if !self.operations().contains(&head.kind()) {
            return unexpected_head("update-user", Some(head));
        }
        let app_id = head.app_id().to_string();
        let onesignal_id = head.onesignal_id().to_string();

        let mut properties = PropertiesObject::default();
        let mut deltas = PropertiesDeltas::default();
        let mut refresh_device_metadata = false;

        for operation in &operations {
            match operation {
                UserOperation::SetTag { key, value, .. } => {
                    properties.tags.insert(key.clone(), value.clone());
                }
                UserOperation::DeleteTag { key, .. } => {
                    properties.tags.insert(key.clone(), String::new());
                }
                UserOperation::SetProperty {
                    property, value, ..
                } => {
                    let value = value.as_str().map(str::to_string);
                    match property.as_str() {
                        "language" => properties.language = value,
                        "timezone" => properties.timezone = value,
                        "country" => properties.country = value,
                        other => debug!(property = other, "unsupported property skipped"),
                    }
                }
                UserOperation::TrackSessionStart { .. } => {
                    deltas.session_count += 1;
                    refresh_device_metadata = true;
                }
                UserOperation::TrackSessionEnd { session_time, .. } => {
                    deltas.session_time += session_time;
                }
                other => debug!(operation = %other.kind(), "not part of a user update"),
            }
        }

        if properties.is_empty() && deltas.is_empty() && !refresh_device_metadata {
            return ExecutionResponse::success();
        }

        match self
            .context
            .backend
            .update_user(
                &app_id,
                &onesignal_id,
                properties,
                refresh_device_metadata,
                deltas,
            )
            .await
        {
            Ok(()) => ExecutionResponse::success(),
            Err(err) => self.context.failure("update-user", &err, &onesignal_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context_for;
    use super::*;
    use crate::backend::BackendCall;
    use crate::error::BackendError;
    use opsync_core::ExecutionResult;

    fn tag(key: &str, value: Option<&str>) -> UserOperation {
        match value {
            Some(value) => UserOperation::SetTag {
                app_id: "app".into(),
                onesignal_id: "R1".into(),
                key: key.into(),
                value: value.into(),
            },
            None => UserOperation::DeleteTag {
                app_id: "app".into(),
                onesignal_id: "R1".into(),
                key: key.into(),
            },
        }
    }

    #[tokio::test]
    async fn folds_batch_into_one_call() {
        let (context, backend) = context_for("R1");
        let executor = UpdateUserExecutor::new(context);

        let response = executor
            .execute(vec![
                tag("a", Some("1")),
                tag("b", None),
                tag("a", Some("2")),
                UserOperation::TrackSessionEnd {
                    app_id: "app".into(),
                    onesignal_id: "R1".into(),
                    session_time: 30,
                },
                UserOperation::TrackSessionStart {
                    app_id: "app".into(),
                    onesignal_id: "R1".into(),
                },
            ])
            .await;

        assert_eq!(response.result, ExecutionResult::Success);
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let BackendCall::UpdateUser {
            properties,
            refresh_device_metadata,
            deltas,
            ..
        } = &calls[0]
        else {
            panic!("expected update_user");
        };
        assert_eq!(properties.tags["a"], "2");
        assert_eq!(properties.tags["b"], "");
        assert!(*refresh_device_metadata);
        assert_eq!(deltas.session_time, 30);
        assert_eq!(deltas.session_count, 1);
    }

    #[tokio::test]
    async fn missing_current_user_is_rebuilt() {
        let (context, backend) = context_for("R1");
        backend.fail_next("update_user", BackendError::new(404, "no user"));
        let executor = UpdateUserExecutor::new(context);

        let response = executor.execute(vec![tag("a", Some("1"))]).await;

        assert_eq!(response.result, ExecutionResult::FailNoRetry);
        let follow_up = response.operations.unwrap();
        assert_eq!(follow_up[0].kind(), UserOperationKind::LoginUser);
    }
}
