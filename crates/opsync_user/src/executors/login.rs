use super::{unexpected_head, ExecutorContext};
use crate::backend::{PropertiesObject, SubscriptionObject, UserState};
use crate::error::{BackendError, ResponseStatusType};
use crate::models::{EXTERNAL_ID, ONESIGNAL_ID};
use crate::operations::{UserOperation, UserOperationKind};
use async_trait::async_trait;
use opsync_core::{
    is_local_id, ExecutionResponse, ExecutionResult, ModelChangeTag, Operation, OperationExecutor,
    TypedModel,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Creates users, or attaches an external id to an existing anonymous user.
pub struct LoginUserExecutor {
    context: ExecutorContext,
}

struct Login {
    app_id: String,
    onesignal_id: String,
    external_id: Option<String>,
}

impl LoginUserExecutor {
    /// Creates the executor.
    pub fn new(context: ExecutorContext) -> Self {
        Self { context }
    }

    async fn identify(
        &self,
        login: &Login,
        external_id: &str,
        existing_onesignal_id: &str,
        rest: &[UserOperation],
    ) -> ExecutionResponse<UserOperation> {
        let aliases = HashMap::from([(EXTERNAL_ID.to_string(), external_id.to_string())]);
        let result = self
            .context
            .backend
            .set_aliases(&login.app_id, existing_onesignal_id, aliases)
            .await;

        match result {
            Ok(_) => {
                info!(onesignal_id = existing_onesignal_id, "identified existing user");
                if self.context.stores.is_current_user(&login.onesignal_id) {
                    self.hydrate_user_id(existing_onesignal_id);
                }
                let translations = HashMap::from([(
                    login.onesignal_id.clone(),
                    existing_onesignal_id.to_string(),
                )]);
                ExecutionResponse::new(ExecutionResult::SuccessStartingOnly)
                    .with_id_translations(translations)
            }
            Err(err) if err.status_type() == ResponseStatusType::Conflict => {
                debug!(external_id, "external id belongs to another user, creating");
                self.create_user(login, rest).await
            }
            Err(err) => self.login_failure(&err, existing_onesignal_id),
        }
    }

    async fn create_user(
        &self,
        login: &Login,
        rest: &[UserOperation],
    ) -> ExecutionResponse<UserOperation> {
        let mut identities = HashMap::new();
        if let Some(external_id) = &login.external_id {
            identities.insert(EXTERNAL_ID.to_string(), external_id.clone());
        }
        let mut properties = PropertiesObject::default();
        let mut subscriptions: Vec<SubscriptionObject> = Vec::new();
        // Grouped operations the create request cannot carry; they run
        // again once the user exists.
        let mut deferred = Vec::new();

        for operation in rest {
            match operation {
                UserOperation::SetTag { key, value, .. } => {
                    properties.tags.insert(key.clone(), value.clone());
                }
                UserOperation::DeleteTag { key, .. } => {
                    properties.tags.remove(key);
                }
                UserOperation::SetProperty {
                    property, value, ..
                } => {
                    let value = value.as_str().map(str::to_string);
                    match property.as_str() {
                        "language" => properties.language = value,
                        "timezone" => properties.timezone = value,
                        "country" => properties.country = value,
                        other => {
                            debug!(property = other, "property not sent on create");
                            deferred.push(operation.clone());
                        }
                    }
                }
                UserOperation::CreateSubscription {
                    subscription_id,
                    subscription_type,
                    enabled,
                    address,
                    status,
                    ..
                } => {
                    subscriptions.retain(|s| &s.id != subscription_id);
                    subscriptions.push(SubscriptionObject {
                        id: subscription_id.clone(),
                        subscription_type: *subscription_type,
                        address: address.clone(),
                        enabled: *enabled,
                        status: *status,
                    });
                }
                UserOperation::UpdateSubscription {
                    subscription_id,
                    enabled,
                    address,
                    status,
                    ..
                } => {
                    if let Some(existing) =
                        subscriptions.iter_mut().find(|s| &s.id == subscription_id)
                    {
                        existing.enabled = *enabled;
                        existing.address = address.clone();
                        existing.status = *status;
                    }
                }
                UserOperation::DeleteSubscription {
                    subscription_id, ..
                } => {
                    subscriptions.retain(|s| &s.id != subscription_id);
                }
                other => {
                    debug!(operation = %other.kind(), "not folded into create");
                    deferred.push(other.clone());
                }
            }
        }

        if let Some(push) = self.context.stores.push_subscription() {
            let push_id = push.subscription_id();
            if !is_local_id(&push_id) && !subscriptions.iter().any(|s| s.id == push_id) {
                subscriptions.push(SubscriptionObject {
                    id: push_id,
                    subscription_type: push.kind(),
                    address: push.address(),
                    enabled: push.enabled(),
                    status: push.status(),
                });
            }
        }

        let result = self
            .context
            .backend
            .create_user(
                &login.app_id,
                identities,
                properties,
                subscriptions.clone(),
            )
            .await;

        match result {
            Ok(state) => self.created(login, &subscriptions, state, deferred),
            Err(err) => match err.status_type() {
                ResponseStatusType::Invalid if login.external_id.is_some() => {
                    warn!(error = %err, "login rejected by backend");
                    ExecutionResponse::new(ExecutionResult::FailInvalidLogin)
                }
                ResponseStatusType::Conflict => {
                    warn!(error = %err, "user creation conflicts with backend state");
                    ExecutionResponse::new(ExecutionResult::FailConflict)
                }
                _ => self.login_failure(&err, &login.onesignal_id),
            },
        }
    }

    fn created(
        &self,
        login: &Login,
        sent: &[SubscriptionObject],
        state: UserState,
        mut deferred: Vec<UserOperation>,
    ) -> ExecutionResponse<UserOperation> {
        let Some(backend_id) = state.identities.get(ONESIGNAL_ID).cloned() else {
            warn!("create user response carries no onesignal_id");
            return ExecutionResponse::new(ExecutionResult::FailRetry);
        };
        info!(onesignal_id = %backend_id, "user created");

        let mut translations = HashMap::new();
        if backend_id != login.onesignal_id {
            translations.insert(login.onesignal_id.clone(), backend_id.clone());
        }
        for (request, response) in sent.iter().zip(&state.subscriptions) {
            if request.id != response.id {
                translations.insert(request.id.clone(), response.id.clone());
            }
        }

        if self.context.stores.is_current_user(&login.onesignal_id) {
            self.hydrate_user_id(&backend_id);
            for (local_id, backend_sid) in &translations {
                if let Some(subscription) = self.context.stores.subscriptions.get(local_id) {
                    subscription
                        .model()
                        .set("id", backend_sid.as_str(), ModelChangeTag::Hydrate);
                }
            }
        }

        let response = ExecutionResponse::success();
        if deferred.is_empty() {
            return response.with_id_translations(translations);
        }
        debug!(count = deferred.len(), "requeueing operations left out of create");
        for operation in &mut deferred {
            operation.translate_ids(&translations);
        }
        response
            .with_id_translations(translations)
            .with_operations(deferred)
    }

    fn hydrate_user_id(&self, onesignal_id: &str) {
        let stores = &self.context.stores;
        stores
            .identity
            .model()
            .set_onesignal_id(onesignal_id, ModelChangeTag::Hydrate);
        stores
            .properties
            .model()
            .set_onesignal_id(onesignal_id, ModelChangeTag::Hydrate);
    }

    fn login_failure(
        &self,
        err: &BackendError,
        onesignal_id: &str,
    ) -> ExecutionResponse<UserOperation> {
        match err.status_type() {
            ResponseStatusType::Missing | ResponseStatusType::Invalid
                if !self.context.new_records.is_in_missing_retry_window(onesignal_id) =>
            {
                warn!(error = %err, "login dropped");
                ExecutionResponse::new(ExecutionResult::FailNoRetry)
            }
            _ => self.context.failure("login-user", err, onesignal_id),
        }
    }
}

#[async_trait]
impl OperationExecutor<UserOperation> for LoginUserExecutor {
    fn operations(&self) -> Vec<UserOperationKind> {
        vec![UserOperationKind::LoginUser]
    }

    async fn execute(&self, operations: Vec<UserOperation>) -> ExecutionResponse<UserOperation> {
        let Some((
            UserOperation::LoginUser {
                app_id,
                onesignal_id,
                external_id,
                existing_onesignal_id,
            },
            rest,
        )) = operations.split_first()
        else {
            return unexpected_head("login-user", operations.first());
        };
        debug!(onesignal_id = %onesignal_id, batch = operations.len(), "executing login");

        let login = Login {
            app_id: app_id.clone(),
            onesignal_id: onesignal_id.clone(),
            external_id: external_id.clone(),
        };
        match (existing_onesignal_id, external_id) {
            (Some(existing), Some(external)) => {
                self.identify(&login, external, existing, rest).await
            }
            _ => self.create_user(&login, rest).await,
        }
    }
}
