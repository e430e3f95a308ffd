use super::{unexpected_head, ExecutorContext};
use crate::backend::UserState;
use crate::models::{
    IdentityModel, PropertiesModel, SubscriptionModel, SubscriptionType, ONESIGNAL_ID, TAGS,
};
use crate::operations::{UserOperation, UserOperationKind};
use async_trait::async_trait;
use opsync_core::{ExecutionResponse, Model, ModelChangeTag, OperationExecutor, TypedModel};
use serde_json::{Map, Value};
use tracing::debug;

/// Fetches the user and overwrites the local models with backend state.
pub struct RefreshUserExecutor {
    context: ExecutorContext,
}

impl RefreshUserExecutor {
    /// Creates the executor.
    pub fn new(context: ExecutorContext) -> Self {
        Self { context }
    }

    fn hydrate(&self, onesignal_id: &str, state: UserState) {
        let stores = &self.context.stores;

        let mut identity = Model::new();
        for (label, value) in state.identities {
            identity = identity.with(&label, value);
        }
        let identity = identity.with(ONESIGNAL_ID, onesignal_id);
        stores
            .identity
            .replace(&IdentityModel::from_model(identity), ModelChangeTag::Hydrate);

        let tags: Map<String, Value> = state
            .properties
            .tags
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        let mut properties = Model::new()
            .with(ONESIGNAL_ID, onesignal_id)
            .with(TAGS, Value::Object(tags));
        for (name, value) in [
            ("language", state.properties.language),
            ("timezone", state.properties.timezone),
            ("country", state.properties.country),
        ] {
            if let Some(value) = value {
                properties = properties.with(name, value);
            }
        }
        stores
            .properties
            .replace(&PropertiesModel::from_model(properties), ModelChangeTag::Hydrate);

        // The push subscription belongs to this device; keep the local one.
        let push = stores.push_subscription();
        let mut subscriptions: Vec<SubscriptionModel> = state
            .subscriptions
            .into_iter()
            .filter(|s| s.subscription_type != SubscriptionType::Push)
            .map(|s| {
                SubscriptionModel::new(&s.id, s.subscription_type, &s.address, s.enabled, s.status)
            })
            .collect();
        if let Some(push) = push {
            subscriptions.push(SubscriptionModel::from_model(Model::from_map(
                push.model().to_map(),
            )));
        }
        stores
            .subscriptions
            .replace_all(subscriptions, ModelChangeTag::Hydrate);
    }
}

#[async_trait]
impl OperationExecutor<UserOperation> for RefreshUserExecutor {
    fn operations(&self) -> Vec<UserOperationKind> {
        vec![UserOperationKind::RefreshUser]
    }

    async fn execute(&self, operations: Vec<UserOperation>) -> ExecutionResponse<UserOperation> {
        let Some(UserOperation::RefreshUser {
            app_id,
            onesignal_id,
        }) = operations.first()
        else {
            return unexpected_head("refresh-user", operations.first());
        };

        if !self.context.stores.is_current_user(onesignal_id) {
            debug!(onesignal_id = %onesignal_id, "user switched, refresh skipped");
            return ExecutionResponse::success();
        }

        match self.context.backend.get_user(app_id, onesignal_id).await {
            Ok(state) => {
                // The user may have switched while the request was in flight.
                if self.context.stores.is_current_user(onesignal_id) {
                    self.hydrate(onesignal_id, state);
                }
                ExecutionResponse::success()
            }
            Err(err) => self.context.failure("refresh-user", &err, onesignal_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context_for;
    use super::*;
    use crate::backend::{PropertiesObject, SubscriptionObject};
    use crate::models::EXTERNAL_ID;
    use opsync_core::ExecutionResult;
    use std::collections::HashMap;

    fn refresh(user: &str) -> UserOperation {
        UserOperation::RefreshUser {
            app_id: "app".into(),
            onesignal_id: user.into(),
        }
    }

    #[tokio::test]
    async fn hydrates_current_user_and_keeps_push() {
        let (context, backend) = context_for("R1");
        context.stores.subscriptions.add(
            SubscriptionModel::new("P1", SubscriptionType::Push, "token", true, 1),
            ModelChangeTag::Hydrate,
        );
        backend.insert_user(
            "R1",
            UserState {
                identities: HashMap::from([
                    (ONESIGNAL_ID.to_string(), "R1".to_string()),
                    (EXTERNAL_ID.to_string(), "alice".to_string()),
                ]),
                properties: PropertiesObject {
                    tags: HashMap::from([("level".to_string(), "9".to_string())]),
                    language: Some("de".into()),
                    ..PropertiesObject::default()
                },
                subscriptions: vec![SubscriptionObject {
                    id: "E1".into(),
                    subscription_type: SubscriptionType::Email,
                    address: "a@b.c".into(),
                    enabled: true,
                    status: 1,
                }],
            },
        );
        let executor = RefreshUserExecutor::new(context.clone());

        let response = executor.execute(vec![refresh("R1")]).await;

        assert_eq!(response.result, ExecutionResult::Success);
        let stores = &context.stores;
        assert_eq!(stores.identity.model().external_id().as_deref(), Some("alice"));
        assert_eq!(stores.properties.model().tags()["level"], "9");
        assert_eq!(stores.properties.model().language().as_deref(), Some("de"));
        let ids: Vec<_> = stores
            .subscriptions
            .list()
            .iter()
            .map(|s| s.subscription_id())
            .collect();
        assert_eq!(ids, ["E1", "P1"]);
    }

    #[tokio::test]
    async fn stale_user_is_not_fetched() {
        let (context, backend) = context_for("R2");
        let executor = RefreshUserExecutor::new(context);

        let response = executor.execute(vec![refresh("R1")]).await;
        assert_eq!(response.result, ExecutionResult::Success);
        assert!(backend.calls().is_empty());
    }
}
