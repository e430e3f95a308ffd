//! Typed user models and their stores.

use opsync_core::{
    Model, ModelChangeTag, ModelStore, SingletonModelStore, SyncResult, TypedModel,
};
use opsync_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Store name of the identity singleton.
pub const IDENTITY_STORE: &str = "identity";
/// Store name of the properties singleton.
pub const PROPERTIES_STORE: &str = "properties";
/// Store name of the subscription collection.
pub const SUBSCRIPTIONS_STORE: &str = "subscriptions";

/// Alias label of the backend user id.
pub const ONESIGNAL_ID: &str = "onesignal_id";
/// Alias label of the application's own user id.
pub const EXTERNAL_ID: &str = "external_id";

/// Properties of the identity model that are not aliases.
const IDENTITY_RESERVED: [&str; 2] = ["id", ONESIGNAL_ID];

/// Identity of the current user: backend id, external id and aliases.
///
/// Every string property except the store id and `onesignal_id` is an
/// alias label, `external_id` included.
#[derive(Debug, Clone)]
pub struct IdentityModel(Model);

impl IdentityModel {
    /// Creates an identity for `onesignal_id`.
    pub fn new(onesignal_id: &str, external_id: Option<&str>) -> Self {
        let model = Model::new().with(ONESIGNAL_ID, onesignal_id);
        Self(match external_id {
            Some(external_id) => model.with(EXTERNAL_ID, external_id),
            None => model,
        })
    }

    /// Backend user id, possibly a local placeholder.
    pub fn onesignal_id(&self) -> Option<String> {
        self.0.get_string(ONESIGNAL_ID)
    }

    /// Sets the backend user id.
    pub fn set_onesignal_id(&self, id: &str, tag: ModelChangeTag) {
        self.0.set(ONESIGNAL_ID, id, tag);
    }

    /// The application's id for the user, if logged in.
    pub fn external_id(&self) -> Option<String> {
        self.0.get_string(EXTERNAL_ID)
    }

    /// Every alias label and value, `external_id` included.
    pub fn aliases(&self) -> HashMap<String, String> {
        self.0
            .to_map()
            .into_iter()
            .filter(|(label, _)| !IDENTITY_RESERVED.contains(&label.as_str()))
            .filter_map(|(label, value)| match value {
                Value::String(s) => Some((label, s)),
                _ => None,
            })
            .collect()
    }

    /// Returns true if `label` cannot be used as a custom alias.
    pub fn is_reserved_label(label: &str) -> bool {
        label.is_empty() || IDENTITY_RESERVED.contains(&label) || label == EXTERNAL_ID
    }
}

impl TypedModel for IdentityModel {
    fn from_model(model: Model) -> Self {
        Self(model)
    }

    fn model(&self) -> &Model {
        &self.0
    }
}

/// Tags and profile properties of the current user.
#[derive(Debug, Clone)]
pub struct PropertiesModel(Model);

/// Nested map holding the user tags.
pub const TAGS: &str = "tags";

impl PropertiesModel {
    /// Creates empty properties for `onesignal_id`.
    pub fn new(onesignal_id: &str) -> Self {
        Self(Model::new().with(ONESIGNAL_ID, onesignal_id))
    }

    /// Backend user id these properties belong to.
    pub fn onesignal_id(&self) -> Option<String> {
        self.0.get_string(ONESIGNAL_ID)
    }

    /// Sets the backend user id.
    pub fn set_onesignal_id(&self, id: &str, tag: ModelChangeTag) {
        self.0.set(ONESIGNAL_ID, id, tag);
    }

    /// All tags with string values.
    pub fn tags(&self) -> HashMap<String, String> {
        self.0
            .map_entries(TAGS)
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect()
    }

    /// Preferred language.
    pub fn language(&self) -> Option<String> {
        self.0.get_string("language")
    }

    /// IANA timezone id.
    pub fn timezone(&self) -> Option<String> {
        self.0.get_string("timezone")
    }

    /// Two letter country code.
    pub fn country(&self) -> Option<String> {
        self.0.get_string("country")
    }
}

impl TypedModel for PropertiesModel {
    fn from_model(model: Model) -> Self {
        Self(model)
    }

    fn model(&self) -> &Model {
        &self.0
    }
}

/// Channel of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    /// Push notifications on this device.
    Push,
    /// An email address.
    Email,
    /// A phone number.
    Sms,
}

impl SubscriptionType {
    /// Lowercase name as stored in models.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::Push => "push",
            SubscriptionType::Email => "email",
            SubscriptionType::Sms => "sms",
        }
    }

    /// Parses a stored name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "push" => Some(SubscriptionType::Push),
            "email" => Some(SubscriptionType::Email),
            "sms" => Some(SubscriptionType::Sms),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status code of a subscription that is able to receive messages.
pub const STATUS_SUBSCRIBED: i64 = 1;

/// One delivery channel of the user.
#[derive(Debug, Clone)]
pub struct SubscriptionModel(Model);

impl SubscriptionModel {
    /// Creates a subscription.
    pub fn new(id: &str, kind: SubscriptionType, address: &str, enabled: bool, status: i64) -> Self {
        Self(
            Model::new()
                .with("id", id)
                .with("type", kind.as_str())
                .with("address", address)
                .with("enabled", enabled)
                .with("status", status),
        )
    }

    /// Subscription id, possibly a local placeholder.
    pub fn subscription_id(&self) -> String {
        self.0.id().unwrap_or_default()
    }

    /// Channel; unknown values read as push.
    pub fn kind(&self) -> SubscriptionType {
        self.0
            .get_string("type")
            .and_then(|t| SubscriptionType::parse(&t))
            .unwrap_or(SubscriptionType::Push)
    }

    /// Push token, email address or phone number.
    pub fn address(&self) -> String {
        self.0.get_string("address").unwrap_or_default()
    }

    /// Whether the user opted in on this channel.
    pub fn enabled(&self) -> bool {
        self.0.get_bool("enabled").unwrap_or(false)
    }

    /// Delivery status code.
    pub fn status(&self) -> i64 {
        self.0
            .get("status")
            .and_then(|v| v.as_i64())
            .unwrap_or(STATUS_SUBSCRIBED)
    }
}

impl TypedModel for SubscriptionModel {
    fn from_model(model: Model) -> Self {
        Self(model)
    }

    fn model(&self) -> &Model {
        &self.0
    }
}

/// The three user stores, shared by the manager, listeners and executors.
#[derive(Clone)]
pub struct UserStores {
    /// Identity singleton.
    pub identity: SingletonModelStore<IdentityModel>,
    /// Properties singleton.
    pub properties: SingletonModelStore<PropertiesModel>,
    /// Subscription collection.
    pub subscriptions: ModelStore<SubscriptionModel>,
}

impl UserStores {
    /// Opens the stores persisted in `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted store cannot be decoded.
    pub fn open(storage: Arc<dyn StorageBackend>) -> SyncResult<Self> {
        Ok(Self {
            identity: SingletonModelStore::open(IDENTITY_STORE, Arc::clone(&storage), || {
                IdentityModel::from_model(Model::new())
            })?,
            properties: SingletonModelStore::open(PROPERTIES_STORE, Arc::clone(&storage), || {
                PropertiesModel::from_model(Model::new())
            })?,
            subscriptions: ModelStore::open(SUBSCRIPTIONS_STORE, storage)?,
        })
    }

    /// Creates stores that are never persisted.
    pub fn in_memory() -> Self {
        Self {
            identity: SingletonModelStore::in_memory(IDENTITY_STORE, || {
                IdentityModel::from_model(Model::new())
            }),
            properties: SingletonModelStore::in_memory(PROPERTIES_STORE, || {
                PropertiesModel::from_model(Model::new())
            }),
            subscriptions: ModelStore::in_memory(SUBSCRIPTIONS_STORE),
        }
    }

    /// Backend id of the current user.
    pub fn current_onesignal_id(&self) -> Option<String> {
        self.identity.model().onesignal_id()
    }

    /// Returns true if `onesignal_id` is still the current user.
    pub fn is_current_user(&self, onesignal_id: &str) -> bool {
        self.current_onesignal_id().as_deref() == Some(onesignal_id)
    }

    /// The push subscription of this device, if any.
    pub fn push_subscription(&self) -> Option<SubscriptionModel> {
        self.subscriptions
            .list()
            .into_iter()
            .find(|s| s.kind() == SubscriptionType::Push)
    }
}
