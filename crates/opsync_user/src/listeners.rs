//! Store listeners mapping user model changes to operations.

use crate::models::{
    IdentityModel, PropertiesModel, SubscriptionModel, UserStores, EXTERNAL_ID, ONESIGNAL_ID,
    TAGS,
};
use crate::operations::UserOperation;
use opsync_core::{ModelChangedArgs, ModelStoreListener, SingletonModelStoreListener};
use serde_json::Value;

/// Turns alias edits into `SetAlias` / `DeleteAlias`.
///
/// `onesignal_id` and `external_id` are driven by login, never by this
/// listener.
pub struct IdentityModelStoreListener {
    app_id: String,
}

impl IdentityModelStoreListener {
    /// Creates a listener for `app_id`.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }
}

impl SingletonModelStoreListener<IdentityModel> for IdentityModelStoreListener {
    type Operation = UserOperation;

    fn replace_operation(&self, _model: &IdentityModel) -> Option<UserOperation> {
        None
    }

    fn update_operation(
        &self,
        model: &IdentityModel,
        args: &ModelChangedArgs,
    ) -> Option<UserOperation> {
        let label = args.property.as_str();
        if args.parent().is_some() || label == ONESIGNAL_ID || label == EXTERNAL_ID || label == "id"
        {
            return None;
        }
        let onesignal_id = model.onesignal_id()?;
        match args.new_value.as_ref().and_then(Value::as_str) {
            Some(value) if !value.is_empty() => Some(UserOperation::SetAlias {
                app_id: self.app_id.clone(),
                onesignal_id,
                label: label.to_string(),
                value: value.to_string(),
            }),
            _ => Some(UserOperation::DeleteAlias {
                app_id: self.app_id.clone(),
                onesignal_id,
                label: label.to_string(),
            }),
        }
    }
}

/// Turns tag and profile edits into `SetTag` / `DeleteTag` / `SetProperty`.
pub struct PropertiesModelStoreListener {
    app_id: String,
}

impl PropertiesModelStoreListener {
    /// Creates a listener for `app_id`.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }
}

impl SingletonModelStoreListener<PropertiesModel> for PropertiesModelStoreListener {
    type Operation = UserOperation;

    fn replace_operation(&self, _model: &PropertiesModel) -> Option<UserOperation> {
        None
    }

    fn update_operation(
        &self,
        model: &PropertiesModel,
        args: &ModelChangedArgs,
    ) -> Option<UserOperation> {
        let onesignal_id = model.onesignal_id()?;
        match args.parent() {
            Some(TAGS) => {
                let key = args.property.clone();
                match args.new_value.as_ref().and_then(Value::as_str) {
                    Some(value) if !value.is_empty() => Some(UserOperation::SetTag {
                        app_id: self.app_id.clone(),
                        onesignal_id,
                        key,
                        value: value.to_string(),
                    }),
                    _ => Some(UserOperation::DeleteTag {
                        app_id: self.app_id.clone(),
                        onesignal_id,
                        key,
                    }),
                }
            }
            Some(_) => None,
            None if args.property == ONESIGNAL_ID || args.property == "id" => None,
            None => Some(UserOperation::SetProperty {
                app_id: self.app_id.clone(),
                onesignal_id,
                property: args.property.clone(),
                value: args.new_value.clone().unwrap_or(Value::Null),
            }),
        }
    }
}

/// Turns subscription store events into subscription operations.
///
/// Operations target the user currently held by the identity store.
pub struct SubscriptionModelStoreListener {
    app_id: String,
    stores: UserStores,
}

impl SubscriptionModelStoreListener {
    /// Creates a listener for `app_id`.
    pub fn new(app_id: impl Into<String>, stores: UserStores) -> Self {
        Self {
            app_id: app_id.into(),
            stores,
        }
    }
}

impl ModelStoreListener<SubscriptionModel> for SubscriptionModelStoreListener {
    type Operation = UserOperation;

    fn add_operation(&self, model: &SubscriptionModel) -> Option<UserOperation> {
        Some(UserOperation::CreateSubscription {
            app_id: self.app_id.clone(),
            onesignal_id: self.stores.current_onesignal_id()?,
            subscription_id: model.subscription_id(),
            subscription_type: model.kind(),
            enabled: model.enabled(),
            address: model.address(),
            status: model.status(),
        })
    }

    fn update_operation(
        &self,
        model: &SubscriptionModel,
        _args: &ModelChangedArgs,
    ) -> Option<UserOperation> {
        Some(UserOperation::UpdateSubscription {
            app_id: self.app_id.clone(),
            onesignal_id: self.stores.current_onesignal_id()?,
            subscription_id: model.subscription_id(),
            subscription_type: model.kind(),
            enabled: model.enabled(),
            address: model.address(),
            status: model.status(),
        })
    }

    fn remove_operation(&self, model: &SubscriptionModel) -> Option<UserOperation> {
        Some(UserOperation::DeleteSubscription {
            app_id: self.app_id.clone(),
            onesignal_id: self.stores.current_onesignal_id()?,
            subscription_id: model.subscription_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionType;
    use async_trait::async_trait;
    use opsync_core::{
        bootstrap_listener, bootstrap_singleton_listener, ModelChangeTag, Operation,
        OperationQueue, TypedModel,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<UserOperation>>);

    #[async_trait]
    impl OperationQueue<UserOperation> for Recorder {
        fn enqueue(&self, operation: UserOperation, _flush: bool) {
            self.0.lock().push(operation);
        }
        async fn enqueue_and_wait(&self, operation: UserOperation, flush: bool) -> bool {
            self.enqueue(operation, flush);
            true
        }
        fn contains_instance_of(&self, kind: crate::UserOperationKind) -> bool {
            self.0.lock().iter().any(|o| o.kind() == kind)
        }
    }

    fn stores_for(user: &str) -> UserStores {
        let stores = UserStores::in_memory();
        stores
            .identity
            .replace(&IdentityModel::new(user, None), ModelChangeTag::Hydrate);
        stores
            .properties
            .replace(&PropertiesModel::new(user), ModelChangeTag::Hydrate);
        stores
    }

    #[test]
    fn alias_changes_map_to_alias_operations() {
        let stores = stores_for("R1");
        let queue = Arc::new(Recorder::default());
        let _handle = bootstrap_singleton_listener(
            &stores.identity,
            IdentityModelStoreListener::new("app"),
            queue.clone(),
        );

        let identity = stores.identity.model();
        identity.model().set("facebook", "fb-1", ModelChangeTag::Normal);
        identity.model().remove("facebook", ModelChangeTag::Normal);
        identity.model().set(EXTERNAL_ID, "alice", ModelChangeTag::Normal);
        identity.model().set("twitter", "tw", ModelChangeTag::Hydrate);

        let ops = queue.0.lock().clone();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], UserOperation::SetAlias { label, value, .. }
            if label == "facebook" && value == "fb-1"));
        assert!(matches!(&ops[1], UserOperation::DeleteAlias { label, .. } if label == "facebook"));
    }

    #[test]
    fn tag_and_property_changes() {
        let stores = stores_for("R1");
        let queue = Arc::new(Recorder::default());
        let _handle = bootstrap_singleton_listener(
            &stores.properties,
            PropertiesModelStoreListener::new("app"),
            queue.clone(),
        );

        let props = stores.properties.model();
        props.model().set_in(TAGS, "level", "3", ModelChangeTag::Normal);
        props.model().set_in(TAGS, "level", "", ModelChangeTag::Normal);
        props.model().remove_in(TAGS, "gone", ModelChangeTag::Normal);
        props.model().set("language", "fr", ModelChangeTag::Normal);
        props.model().set(ONESIGNAL_ID, "R2", ModelChangeTag::Normal);

        let kinds: Vec<_> = queue.0.lock().iter().map(|o| o.kind().as_str()).collect();
        assert_eq!(kinds, ["set-tag", "delete-tag", "delete-tag", "set-property"]);
    }

    #[test]
    fn subscription_events_target_current_user() {
        let stores = stores_for("R1");
        let queue = Arc::new(Recorder::default());
        let handle = bootstrap_listener(
            &stores.subscriptions,
            SubscriptionModelStoreListener::new("app", stores.clone()),
            queue.clone(),
        );

        let sub = SubscriptionModel::new("local-s", SubscriptionType::Email, "a@b.c", true, 1);
        stores.subscriptions.add(sub.clone(), ModelChangeTag::Normal);
        sub.model().set("enabled", false, ModelChangeTag::Normal);
        stores.subscriptions.remove("local-s", ModelChangeTag::Normal);
        handle.close();
        stores.subscriptions.add(
            SubscriptionModel::new("s2", SubscriptionType::Sms, "+1", true, 1),
            ModelChangeTag::Normal,
        );

        let ops = queue.0.lock().clone();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|o| o.onesignal_id() == "R1"));
        assert!(matches!(&ops[1], UserOperation::UpdateSubscription { enabled: false, .. }));
        assert_eq!(ops[2].kind().as_str(), "delete-subscription");
    }

    #[test]
    fn hydrated_subscriptions_are_not_echoed() {
        let stores = stores_for("R1");
        let queue = Arc::new(Recorder::default());
        let _handle = bootstrap_listener(
            &stores.subscriptions,
            SubscriptionModelStoreListener::new("app", stores.clone()),
            queue.clone(),
        );
        stores.subscriptions.replace_all(
            vec![SubscriptionModel::new("s1", SubscriptionType::Push, "t", true, 1)],
            ModelChangeTag::Hydrate,
        );
        assert!(queue.0.lock().is_empty());
    }
}
