//! Application-facing user API.

use crate::error::{UserError, UserResult};
use crate::models::{
    IdentityModel, PropertiesModel, SubscriptionModel, SubscriptionType, UserStores,
    STATUS_SUBSCRIBED, TAGS,
};
use crate::operations::UserOperation;
use opsync_core::{create_local_id, ModelChangeTag, OperationQueue, TypedModel};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads and edits the current user.
///
/// Edits are applied to the local models immediately and reach the backend
/// through the store listeners. Only [`UserManager::login`] waits for the
/// backend.
#[derive(Clone)]
pub struct UserManager {
    app_id: String,
    stores: UserStores,
    queue: Arc<dyn OperationQueue<UserOperation>>,
}

impl UserManager {
    /// Creates a manager over `stores`, queueing on `queue`.
    pub fn new(
        app_id: impl Into<String>,
        stores: UserStores,
        queue: Arc<dyn OperationQueue<UserOperation>>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            stores,
            queue,
        }
    }

    /// Switches to the user identified by `external_id`.
    ///
    /// An anonymous current user is identified as `external_id` on the
    /// backend instead of being discarded. Returns false if the login failed.
    pub async fn login(&self, external_id: &str) -> UserResult<bool> {
        if external_id.is_empty() {
            return Err(UserError::InvalidArgument("external id is empty".into()));
        }
        let identity = self.stores.identity.model();
        let previous_external_id = identity.external_id();
        if previous_external_id.as_deref() == Some(external_id) {
            debug!(external_id, "already logged in");
            return Ok(true);
        }

        let existing_onesignal_id = match previous_external_id {
            None => identity.onesignal_id(),
            Some(_) => None,
        };
        let onesignal_id = create_local_id();
        self.switch_user(&onesignal_id, Some(external_id));
        info!(external_id, "logging in");

        let login = UserOperation::LoginUser {
            app_id: self.app_id.clone(),
            onesignal_id,
            external_id: Some(external_id.to_string()),
            existing_onesignal_id,
        };
        if !self.queue.enqueue_and_wait(login, true).await {
            warn!(external_id, "login failed");
            return Ok(false);
        }

        if let Some(onesignal_id) = self.stores.current_onesignal_id() {
            self.queue.enqueue(
                UserOperation::RefreshUser {
                    app_id: self.app_id.clone(),
                    onesignal_id,
                },
                true,
            );
        }
        Ok(true)
    }

    /// Switches to a new anonymous user. Does nothing if no user is logged in.
    pub fn logout(&self) {
        if self.stores.identity.model().external_id().is_none() {
            debug!("logout without login ignored");
            return;
        }
        info!("logging out");
        self.create_anonymous_user();
    }

    /// Replaces the current user with a fresh anonymous one and queues its
    /// creation.
    pub(crate) fn create_anonymous_user(&self) {
        let onesignal_id = create_local_id();
        self.switch_user(&onesignal_id, None);
        self.queue.enqueue(
            UserOperation::LoginUser {
                app_id: self.app_id.clone(),
                onesignal_id,
                external_id: None,
                existing_onesignal_id: None,
            },
            true,
        );
    }

    fn switch_user(&self, onesignal_id: &str, external_id: Option<&str>) {
        self.stores.identity.replace(
            &IdentityModel::new(onesignal_id, external_id),
            ModelChangeTag::Hydrate,
        );
        self.stores.properties.replace(
            &PropertiesModel::new(onesignal_id),
            ModelChangeTag::Hydrate,
        );
        let kept: Vec<_> = self.stores.push_subscription().into_iter().collect();
        self.stores
            .subscriptions
            .replace_all(kept, ModelChangeTag::Hydrate);
    }

    /// Backend id of the current user, possibly still local.
    pub fn onesignal_id(&self) -> Option<String> {
        self.stores.current_onesignal_id()
    }

    /// External id of the current user.
    pub fn external_id(&self) -> Option<String> {
        self.stores.identity.model().external_id()
    }

    /// Tags of the current user.
    pub fn tags(&self) -> HashMap<String, String> {
        self.stores.properties.model().tags()
    }

    /// Aliases of the current user, `external_id` included.
    pub fn aliases(&self) -> HashMap<String, String> {
        self.stores.identity.model().aliases()
    }

    /// Sets a tag.
    pub fn add_tag(&self, key: &str, value: &str) {
        self.stores
            .properties
            .model()
            .model()
            .set_in(TAGS, key, value, ModelChangeTag::Normal);
    }

    /// Sets several tags.
    pub fn add_tags<'a>(&self, tags: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (key, value) in tags {
            self.add_tag(key, value);
        }
    }

    /// Removes a tag.
    pub fn remove_tag(&self, key: &str) {
        self.stores
            .properties
            .model()
            .model()
            .remove_in(TAGS, key, ModelChangeTag::Normal);
    }

    /// Removes several tags.
    pub fn remove_tags<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.remove_tag(key);
        }
    }

    /// Adds or changes an alias.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidArgument`] for a reserved label or an
    /// empty id.
    pub fn add_alias(&self, label: &str, id: &str) -> UserResult<()> {
        if IdentityModel::is_reserved_label(label) {
            return Err(UserError::InvalidArgument(format!(
                "alias label '{label}' is reserved"
            )));
        }
        if id.is_empty() {
            return Err(UserError::InvalidArgument(format!(
                "alias '{label}' has an empty id"
            )));
        }
        self.stores
            .identity
            .model()
            .model()
            .set(label, id, ModelChangeTag::Normal);
        Ok(())
    }

    /// Removes an alias.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidArgument`] for a reserved label.
    pub fn remove_alias(&self, label: &str) -> UserResult<()> {
        if IdentityModel::is_reserved_label(label) {
            return Err(UserError::InvalidArgument(format!(
                "alias label '{label}' is reserved"
            )));
        }
        self.stores
            .identity
            .model()
            .model()
            .remove(label, ModelChangeTag::Normal);
        Ok(())
    }

    /// Sets the preferred language.
    pub fn set_language(&self, language: &str) {
        self.stores
            .properties
            .model()
            .model()
            .set("language", language, ModelChangeTag::Normal);
    }

    /// Adds an email subscription.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidArgument`] for an empty address.
    pub fn add_email(&self, email: &str) -> UserResult<()> {
        self.add_subscription(SubscriptionType::Email, email)
    }

    /// Removes the email subscription for `email`, if any.
    pub fn remove_email(&self, email: &str) {
        self.remove_subscription(SubscriptionType::Email, email);
    }

    /// Adds an SMS subscription.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidArgument`] for an empty number.
    pub fn add_sms(&self, number: &str) -> UserResult<()> {
        self.add_subscription(SubscriptionType::Sms, number)
    }

    /// Removes the SMS subscription for `number`, if any.
    pub fn remove_sms(&self, number: &str) {
        self.remove_subscription(SubscriptionType::Sms, number);
    }

    /// Counts a new session for the current user.
    pub fn track_session_start(&self) {
        if let Some(onesignal_id) = self.onesignal_id() {
            self.queue.enqueue(
                UserOperation::TrackSessionStart {
                    app_id: self.app_id.clone(),
                    onesignal_id,
                },
                false,
            );
        }
    }

    /// Adds `seconds` of session time to the current user.
    pub fn track_session_end(&self, seconds: u64) {
        if let Some(onesignal_id) = self.onesignal_id() {
            self.queue.enqueue(
                UserOperation::TrackSessionEnd {
                    app_id: self.app_id.clone(),
                    onesignal_id,
                    session_time: seconds,
                },
                false,
            );
        }
    }

    fn find_subscription(
        &self,
        kind: SubscriptionType,
        address: &str,
    ) -> Option<SubscriptionModel> {
        self.stores
            .subscriptions
            .list()
            .into_iter()
            .find(|s| s.kind() == kind && s.address() == address)
    }

    fn add_subscription(&self, kind: SubscriptionType, address: &str) -> UserResult<()> {
        if address.is_empty() {
            return Err(UserError::InvalidArgument(format!("{kind} address is empty")));
        }
        if self.find_subscription(kind, address).is_some() {
            debug!(%kind, "subscription already present");
            return Ok(());
        }
        self.stores.subscriptions.add(
            SubscriptionModel::new(&create_local_id(), kind, address, true, STATUS_SUBSCRIBED),
            ModelChangeTag::Normal,
        );
        Ok(())
    }

    fn remove_subscription(&self, kind: SubscriptionType, address: &str) {
        match self.find_subscription(kind, address) {
            Some(subscription) => {
                self.stores
                    .subscriptions
                    .remove(&subscription.subscription_id(), ModelChangeTag::Normal);
            }
            None => debug!(%kind, "no subscription to remove"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::{
        IdentityModelStoreListener, PropertiesModelStoreListener, SubscriptionModelStoreListener,
    };
    use crate::operations::UserOperationKind;
    use async_trait::async_trait;
    use opsync_core::{bootstrap_listener, bootstrap_singleton_listener, is_local_id, Operation};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Queue {
        ops: Mutex<Vec<UserOperation>>,
        fail_waits: Mutex<bool>,
    }

    #[async_trait]
    impl OperationQueue<UserOperation> for Queue {
        fn enqueue(&self, operation: UserOperation, _flush: bool) {
            self.ops.lock().push(operation);
        }
        async fn enqueue_and_wait(&self, operation: UserOperation, flush: bool) -> bool {
            self.enqueue(operation, flush);
            !*self.fail_waits.lock()
        }
        fn contains_instance_of(&self, kind: UserOperationKind) -> bool {
            self.ops.lock().iter().any(|o| o.kind() == kind)
        }
    }

    fn wired() -> (UserManager, Arc<Queue>) {
        let stores = UserStores::in_memory();
        let queue = Arc::new(Queue::default());
        let dyn_queue: Arc<dyn OperationQueue<UserOperation>> = queue.clone();
        // Handles dropped without close stay attached.
        let _ = bootstrap_singleton_listener(
            &stores.identity,
            IdentityModelStoreListener::new("app"),
            dyn_queue.clone(),
        );
        let _ = bootstrap_singleton_listener(
            &stores.properties,
            PropertiesModelStoreListener::new("app"),
            dyn_queue.clone(),
        );
        let _ = bootstrap_listener(
            &stores.subscriptions,
            SubscriptionModelStoreListener::new("app", stores.clone()),
            dyn_queue.clone(),
        );
        let manager = UserManager::new("app", stores, dyn_queue);
        manager.create_anonymous_user();
        queue.ops.lock().clear();
        (manager, queue)
    }

    fn kinds(queue: &Queue) -> Vec<&'static str> {
        queue.ops.lock().iter().map(|o| o.kind().as_str()).collect()
    }

    #[tokio::test]
    async fn login_identifies_anonymous_user_then_refreshes() {
        let (manager, queue) = wired();
        let anonymous = manager.onesignal_id().unwrap();

        assert!(manager.login("alice").await.unwrap());

        let ops = queue.ops.lock().clone();
        assert_eq!(ops.len(), 2);
        assert!(matches!(
            &ops[0],
            UserOperation::LoginUser { external_id: Some(e), existing_onesignal_id: Some(x), .. }
                if e == "alice" && *x == anonymous
        ));
        assert_eq!(ops[1].kind(), UserOperationKind::RefreshUser);
        assert_eq!(manager.external_id().as_deref(), Some("alice"));
        assert!(is_local_id(&manager.onesignal_id().unwrap()));

        // Same user again is a no-op.
        assert!(manager.login("alice").await.unwrap());
        assert_eq!(queue.ops.lock().len(), 2);
    }

    #[tokio::test]
    async fn switching_between_known_users_does_not_identify() {
        let (manager, queue) = wired();
        manager.login("alice").await.unwrap();
        queue.ops.lock().clear();

        manager.login("bob").await.unwrap();
        assert!(matches!(
            &queue.ops.lock()[0],
            UserOperation::LoginUser { existing_onesignal_id: None, .. }
        ));
    }

    #[tokio::test]
    async fn failed_login_skips_refresh() {
        let (manager, queue) = wired();
        *queue.fail_waits.lock() = true;
        assert!(!manager.login("alice").await.unwrap());
        assert_eq!(kinds(&queue), ["login-user"]);
    }

    #[test]
    fn edits_become_operations() {
        let (manager, queue) = wired();
        manager.add_tags([("a", "1"), ("b", "2")]);
        manager.remove_tag("a");
        manager.add_alias("facebook", "fb").unwrap();
        manager.set_language("fr");
        manager.add_email("a@b.c").unwrap();
        manager.add_email("a@b.c").unwrap();
        manager.remove_email("a@b.c");

        assert_eq!(
            kinds(&queue),
            [
                "set-tag",
                "set-tag",
                "delete-tag",
                "set-alias",
                "set-property",
                "create-subscription",
                "delete-subscription",
            ]
        );
        assert_eq!(manager.tags().get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let (manager, queue) = wired();
        assert!(matches!(
            manager.add_alias("external_id", "x"),
            Err(UserError::InvalidArgument(_))
        ));
        assert!(manager.add_alias("facebook", "").is_err());
        assert!(manager.remove_alias("onesignal_id").is_err());
        assert!(manager.add_sms("").is_err());
        assert!(queue.ops.lock().is_empty());
    }

    #[test]
    fn logout_creates_anonymous_user() {
        let (manager, queue) = wired();
        manager.logout();
        assert!(queue.ops.lock().is_empty());

        manager.switch_user("R1", Some("alice"));
        manager.logout();
        assert_eq!(manager.external_id(), None);
        assert_eq!(kinds(&queue), ["login-user"]);
    }
}
