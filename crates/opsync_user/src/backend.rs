//! The user backend collaborator.

use crate::error::BackendError;
use crate::models::SubscriptionType;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Result of a backend call.
pub type BackendResult<T> = Result<T, BackendError>;

/// Profile properties sent to or received from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertiesObject {
    /// Tags; an empty value deletes the tag.
    pub tags: HashMap<String, String>,
    /// Preferred language.
    pub language: Option<String>,
    /// IANA timezone id.
    pub timezone: Option<String>,
    /// Two letter country code.
    pub country: Option<String>,
}

impl PropertiesObject {
    /// Returns true if nothing would be changed.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.language.is_none()
            && self.timezone.is_none()
            && self.country.is_none()
    }
}

/// Counters the backend accumulates rather than overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertiesDeltas {
    /// Seconds of session time to add.
    pub session_time: u64,
    /// Sessions to add.
    pub session_count: u64,
}

impl PropertiesDeltas {
    /// Returns true if both counters are zero.
    pub fn is_empty(&self) -> bool {
        self.session_time == 0 && self.session_count == 0
    }
}

/// A subscription as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionObject {
    /// Subscription id; local ids are replaced by the backend.
    pub id: String,
    /// Channel.
    pub subscription_type: SubscriptionType,
    /// Token, email or phone number.
    pub address: String,
    /// Opt-in state.
    pub enabled: bool,
    /// Delivery status code.
    pub status: i64,
}

/// Full user state returned by create and fetch calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    /// Alias labels to values, `onesignal_id` included.
    pub identities: HashMap<String, String>,
    /// Profile properties.
    pub properties: PropertiesObject,
    /// Subscriptions in request order.
    pub subscriptions: Vec<SubscriptionObject>,
}

/// Remote user API used by the executors.
///
/// Implementations report failures as [`BackendError`] carrying the HTTP
/// status; the executors decide what each status means for the queue.
#[async_trait]
pub trait UserBackend: Send + Sync {
    /// Creates a user, returning its backend state.
    async fn create_user(
        &self,
        app_id: &str,
        identities: HashMap<String, String>,
        properties: PropertiesObject,
        subscriptions: Vec<SubscriptionObject>,
    ) -> BackendResult<UserState>;

    /// Adds aliases to the user `onesignal_id`.
    async fn set_aliases(
        &self,
        app_id: &str,
        onesignal_id: &str,
        identities: HashMap<String, String>,
    ) -> BackendResult<HashMap<String, String>>;

    /// Removes an alias.
    async fn delete_alias(&self, app_id: &str, onesignal_id: &str, label: &str)
        -> BackendResult<()>;

    /// Updates properties and accumulates deltas.
    async fn update_user(
        &self,
        app_id: &str,
        onesignal_id: &str,
        properties: PropertiesObject,
        refresh_device_metadata: bool,
        deltas: PropertiesDeltas,
    ) -> BackendResult<()>;

    /// Fetches the user.
    async fn get_user(&self, app_id: &str, onesignal_id: &str) -> BackendResult<UserState>;

    /// Creates a subscription, returning the backend id if one was assigned.
    async fn create_subscription(
        &self,
        app_id: &str,
        onesignal_id: &str,
        subscription: SubscriptionObject,
    ) -> BackendResult<Option<String>>;

    /// Replaces the state of a subscription.
    async fn update_subscription(
        &self,
        app_id: &str,
        subscription_id: &str,
        subscription: SubscriptionObject,
    ) -> BackendResult<()>;

    /// Deletes a subscription.
    async fn delete_subscription(&self, app_id: &str, subscription_id: &str) -> BackendResult<()>;

    /// Moves a subscription to `onesignal_id`.
    async fn transfer_subscription(
        &self,
        app_id: &str,
        subscription_id: &str,
        onesignal_id: &str,
    ) -> BackendResult<()>;
}

/// One recorded call to [`MockUserBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// `create_user`.
    CreateUser {
        /// Identities sent.
        identities: HashMap<String, String>,
        /// Properties sent.
        properties: PropertiesObject,
        /// Subscriptions sent.
        subscriptions: Vec<SubscriptionObject>,
    },
    /// `set_aliases`.
    SetAliases {
        /// Target user.
        onesignal_id: String,
        /// Aliases sent.
        identities: HashMap<String, String>,
    },
    /// `delete_alias`.
    DeleteAlias {
        /// Target user.
        onesignal_id: String,
        /// Label removed.
        label: String,
    },
    /// `update_user`.
    UpdateUser {
        /// Target user.
        onesignal_id: String,
        /// Properties sent.
        properties: PropertiesObject,
        /// Whether device metadata was refreshed.
        refresh_device_metadata: bool,
        /// Deltas sent.
        deltas: PropertiesDeltas,
    },
    /// `get_user`.
    GetUser {
        /// Target user.
        onesignal_id: String,
    },
    /// `create_subscription`.
    CreateSubscription {
        /// Owner.
        onesignal_id: String,
        /// Subscription sent.
        subscription: SubscriptionObject,
    },
    /// `update_subscription`.
    UpdateSubscription {
        /// Target subscription.
        subscription_id: String,
        /// State sent.
        subscription: SubscriptionObject,
    },
    /// `delete_subscription`.
    DeleteSubscription {
        /// Target subscription.
        subscription_id: String,
    },
    /// `transfer_subscription`.
    TransferSubscription {
        /// Target subscription.
        subscription_id: String,
        /// New owner.
        onesignal_id: String,
    },
}

impl BackendCall {
    /// Method name of the call.
    pub fn method(&self) -> &'static str {
        match self {
            BackendCall::CreateUser { .. } => "create_user",
            BackendCall::SetAliases { .. } => "set_aliases",
            BackendCall::DeleteAlias { .. } => "delete_alias",
            BackendCall::UpdateUser { .. } => "update_user",
            BackendCall::GetUser { .. } => "get_user",
            BackendCall::CreateSubscription { .. } => "create_subscription",
            BackendCall::UpdateSubscription { .. } => "update_subscription",
            BackendCall::DeleteSubscription { .. } => "delete_subscription",
            BackendCall::TransferSubscription { .. } => "transfer_subscription",
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<BackendCall>,
    failures: HashMap<&'static str, VecDeque<BackendError>>,
    users: HashMap<String, UserState>,
    next_id: u64,
}

impl MockState {
    fn fail(&mut self, method: &'static str) -> BackendResult<()> {
        match self.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// An in-memory backend for tests.
///
/// Records every call, assigns ids `user-N` / `sub-N` and answers from the
/// users it created. Failures can be scripted per method and are consumed
/// in order before the call is recorded as succeeding.
#[derive(Default)]
pub struct MockUserBackend {
    state: Mutex<MockState>,
}

impl MockUserBackend {
    /// Creates a backend with no users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call to `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: BackendError) {
        self.state
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Adds a user the backend already knows.
    pub fn insert_user(&self, onesignal_id: &str, state: UserState) {
        self.state
            .lock()
            .users
            .insert(onesignal_id.to_string(), state);
    }

    /// Returns the recorded calls.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the recorded calls of one method.
    pub fn calls_to(&self, method: &str) -> Vec<BackendCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.method() == method)
            .cloned()
            .collect()
    }

    /// Returns the backend state of a user.
    pub fn user(&self, onesignal_id: &str) -> Option<UserState> {
        self.state.lock().users.get(onesignal_id).cloned()
    }
}

#[async_trait]
impl UserBackend for MockUserBackend {
    async fn create_user(
        &self,
        _app_id: &str,
        identities: HashMap<String, String>,
        properties: PropertiesObject,
        subscriptions: Vec<SubscriptionObject>,
    ) -> BackendResult<UserState> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateUser {
            identities: identities.clone(),
            properties: properties.clone(),
            subscriptions: subscriptions.clone(),
        });
        state.fail("create_user")?;

        let onesignal_id = state.fresh_id("user");
        let mut created = UserState {
            identities,
            properties,
            subscriptions: Vec::new(),
        };
        created
            .identities
            .insert("onesignal_id".to_string(), onesignal_id.clone());
        for mut subscription in subscriptions {
            if opsync_core::is_local_id(&subscription.id) {
                subscription.id = state.fresh_id("sub");
            }
            created.subscriptions.push(subscription);
        }
        state.users.insert(onesignal_id, created.clone());
        Ok(created)
    }

    async fn set_aliases(
        &self,
        _app_id: &str,
        onesignal_id: &str,
        identities: HashMap<String, String>,
    ) -> BackendResult<HashMap<String, String>> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::SetAliases {
            onesignal_id: onesignal_id.to_string(),
            identities: identities.clone(),
        });
        state.fail("set_aliases")?;
        if let Some(user) = state.users.get_mut(onesignal_id) {
            user.identities.extend(identities.clone());
        }
        Ok(identities)
    }

    async fn delete_alias(
        &self,
        _app_id: &str,
        onesignal_id: &str,
        label: &str,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DeleteAlias {
            onesignal_id: onesignal_id.to_string(),
            label: label.to_string(),
        });
        state.fail("delete_alias")?;
        if let Some(user) = state.users.get_mut(onesignal_id) {
            user.identities.remove(label);
        }
        Ok(())
    }

    async fn update_user(
        &self,
        _app_id: &str,
        onesignal_id: &str,
        properties: PropertiesObject,
        refresh_device_metadata: bool,
        deltas: PropertiesDeltas,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::UpdateUser {
            onesignal_id: onesignal_id.to_string(),
            properties: properties.clone(),
            refresh_device_metadata,
            deltas,
        });
        state.fail("update_user")?;
        if let Some(user) = state.users.get_mut(onesignal_id) {
            for (key, value) in properties.tags {
                if value.is_empty() {
                    user.properties.tags.remove(&key);
                } else {
                    user.properties.tags.insert(key, value);
                }
            }
            if properties.language.is_some() {
                user.properties.language = properties.language;
            }
            if properties.timezone.is_some() {
                user.properties.timezone = properties.timezone;
            }
            if properties.country.is_some() {
                user.properties.country = properties.country;
            }
        }
        Ok(())
    }

    async fn get_user(&self, _app_id: &str, onesignal_id: &str) -> BackendResult<UserState> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::GetUser {
            onesignal_id: onesignal_id.to_string(),
        });
        state.fail("get_user")?;
        state
            .users
            .get(onesignal_id)
            .cloned()
            .ok_or_else(|| BackendError::new(404, "user not found"))
    }

    async fn create_subscription(
        &self,
        _app_id: &str,
        onesignal_id: &str,
        mut subscription: SubscriptionObject,
    ) -> BackendResult<Option<String>> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateSubscription {
            onesignal_id: onesignal_id.to_string(),
            subscription: subscription.clone(),
        });
        state.fail("create_subscription")?;
        let id = state.fresh_id("sub");
        subscription.id = id.clone();
        if let Some(user) = state.users.get_mut(onesignal_id) {
            user.subscriptions.push(subscription);
        }
        Ok(Some(id))
    }

    async fn update_subscription(
        &self,
        _app_id: &str,
        subscription_id: &str,
        subscription: SubscriptionObject,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::UpdateSubscription {
            subscription_id: subscription_id.to_string(),
            subscription,
        });
        state.fail("update_subscription")
    }

    async fn delete_subscription(&self, _app_id: &str, subscription_id: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DeleteSubscription {
            subscription_id: subscription_id.to_string(),
        });
        state.fail("delete_subscription")?;
        for user in state.users.values_mut() {
            user.subscriptions.retain(|s| s.id != subscription_id);
        }
        Ok(())
    }

    async fn transfer_subscription(
        &self,
        _app_id: &str,
        subscription_id: &str,
        onesignal_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::TransferSubscription {
            subscription_id: subscription_id.to_string(),
            onesignal_id: onesignal_id.to_string(),
        });
        state.fail("transfer_subscription")
    }
}
