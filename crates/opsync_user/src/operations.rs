//! The user operation set.

use crate::models::SubscriptionType;
use opsync_core::{is_local_id, GroupComparisonType, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Kind of a [`UserOperation`], used to route it to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserOperationKind {
    /// Create or identify a user.
    LoginUser,
    /// Fetch the user from the backend.
    RefreshUser,
    /// Add or change an alias.
    SetAlias,
    /// Remove an alias.
    DeleteAlias,
    /// Add or change a tag.
    SetTag,
    /// Remove a tag.
    DeleteTag,
    /// Change a profile property.
    SetProperty,
    /// Count a new session.
    TrackSessionStart,
    /// Add session time.
    TrackSessionEnd,
    /// Create a subscription.
    CreateSubscription,
    /// Change a subscription.
    UpdateSubscription,
    /// Remove a subscription.
    DeleteSubscription,
    /// Move a subscription to another user.
    TransferSubscription,
}

impl UserOperationKind {
    /// Kebab-case name, also used in the persisted form.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserOperationKind::LoginUser => "login-user",
            UserOperationKind::RefreshUser => "refresh-user",
            UserOperationKind::SetAlias => "set-alias",
            UserOperationKind::DeleteAlias => "delete-alias",
            UserOperationKind::SetTag => "set-tag",
            UserOperationKind::DeleteTag => "delete-tag",
            UserOperationKind::SetProperty => "set-property",
            UserOperationKind::TrackSessionStart => "track-session-start",
            UserOperationKind::TrackSessionEnd => "track-session-end",
            UserOperationKind::CreateSubscription => "create-subscription",
            UserOperationKind::UpdateSubscription => "update-subscription",
            UserOperationKind::DeleteSubscription => "delete-subscription",
            UserOperationKind::TransferSubscription => "transfer-subscription",
        }
    }
}

impl fmt::Display for UserOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending backend work for the user state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum UserOperation {
    /// Create a user, or attach `external_id` to an existing anonymous one.
    LoginUser {
        /// Application id.
        app_id: String,
        /// Id of the user being logged in, usually local.
        onesignal_id: String,
        /// Application user id.
        external_id: Option<String>,
        /// Anonymous user to identify instead of creating a new one.
        existing_onesignal_id: Option<String>,
    },
    /// Fetch the user and hydrate local models.
    RefreshUser {
        /// Application id.
        app_id: String,
        /// User to fetch.
        onesignal_id: String,
    },
    /// Add or change an alias.
    SetAlias {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Alias label.
        label: String,
        /// Alias value.
        value: String,
    },
    /// Remove an alias.
    DeleteAlias {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Alias label.
        label: String,
    },
    /// Add or change a tag.
    SetTag {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Tag key.
        key: String,
        /// Tag value.
        value: String,
    },
    /// Remove a tag.
    DeleteTag {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Tag key.
        key: String,
    },
    /// Change a top-level profile property.
    SetProperty {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Property name.
        property: String,
        /// New value, `null` to clear.
        value: Value,
    },
    /// Count a new session.
    TrackSessionStart {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
    },
    /// Add the length of a finished session.
    TrackSessionEnd {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Session length in seconds.
        session_time: u64,
    },
    /// Create a subscription.
    CreateSubscription {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Subscription id, usually local.
        subscription_id: String,
        /// Channel.
        subscription_type: SubscriptionType,
        /// Opt-in state.
        enabled: bool,
        /// Token, email or phone number.
        address: String,
        /// Delivery status code.
        status: i64,
    },
    /// Replace the state of a subscription.
    UpdateSubscription {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Subscription id.
        subscription_id: String,
        /// Channel.
        subscription_type: SubscriptionType,
        /// Opt-in state.
        enabled: bool,
        /// Token, email or phone number.
        address: String,
        /// Delivery status code.
        status: i64,
    },
    /// Remove a subscription.
    DeleteSubscription {
        /// Application id.
        app_id: String,
        /// Owning user.
        onesignal_id: String,
        /// Subscription id.
        subscription_id: String,
    },
    /// Move a subscription to another user.
    TransferSubscription {
        /// Application id.
        app_id: String,
        /// Subscription id.
        subscription_id: String,
        /// New owner.
        onesignal_id: String,
    },
}

impl UserOperation {
    /// Application id of the operation.
    pub fn app_id(&self) -> &str {
        match self {
            UserOperation::LoginUser { app_id, .. }
            | UserOperation::RefreshUser { app_id, .. }
            | UserOperation::SetAlias { app_id, .. }
            | UserOperation::DeleteAlias { app_id, .. }
            | UserOperation::SetTag { app_id, .. }
            | UserOperation::DeleteTag { app_id, .. }
            | UserOperation::SetProperty { app_id, .. }
            | UserOperation::TrackSessionStart { app_id, .. }
            | UserOperation::TrackSessionEnd { app_id, .. }
            | UserOperation::CreateSubscription { app_id, .. }
            | UserOperation::UpdateSubscription { app_id, .. }
            | UserOperation::DeleteSubscription { app_id, .. }
            | UserOperation::TransferSubscription { app_id, .. } => app_id,
        }
    }

    /// User the operation belongs to.
    pub fn onesignal_id(&self) -> &str {
        match self {
            UserOperation::LoginUser { onesignal_id, .. }
            | UserOperation::RefreshUser { onesignal_id, .. }
            | UserOperation::SetAlias { onesignal_id, .. }
            | UserOperation::DeleteAlias { onesignal_id, .. }
            | UserOperation::SetTag { onesignal_id, .. }
            | UserOperation::DeleteTag { onesignal_id, .. }
            | UserOperation::SetProperty { onesignal_id, .. }
            | UserOperation::TrackSessionStart { onesignal_id, .. }
            | UserOperation::TrackSessionEnd { onesignal_id, .. }
            | UserOperation::CreateSubscription { onesignal_id, .. }
            | UserOperation::UpdateSubscription { onesignal_id, .. }
            | UserOperation::DeleteSubscription { onesignal_id, .. }
            | UserOperation::TransferSubscription { onesignal_id, .. } => onesignal_id,
        }
    }

    /// Subscription the operation targets, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            UserOperation::CreateSubscription {
                subscription_id, ..
            }
            | UserOperation::UpdateSubscription {
                subscription_id, ..
            }
            | UserOperation::DeleteSubscription {
                subscription_id, ..
            }
            | UserOperation::TransferSubscription {
                subscription_id, ..
            } => Some(subscription_id.as_str()),
            _ => None,
        }
    }

    /// Every id field this operation carries.
    pub fn referenced_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.onesignal_id()];
        if let UserOperation::LoginUser {
            existing_onesignal_id: Some(existing),
            ..
        } = self
        {
            ids.push(existing);
        }
        if let Some(sid) = self.subscription_id() {
            ids.push(sid);
        }
        ids
    }

    fn user_key(&self) -> String {
        format!("{}.User.{}", self.app_id(), self.onesignal_id())
    }

    fn subscription_key(&self) -> String {
        format!(
            "{}.User.{}.Subscription.{}",
            self.app_id(),
            self.onesignal_id(),
            self.subscription_id().unwrap_or_default()
        )
    }
}

fn translate(id: &mut String, translations: &HashMap<String, String>) {
    if let Some(new_id) = translations.get(id.as_str()) {
        *id = new_id.clone();
    }
}

impl Operation for UserOperation {
    type Kind = UserOperationKind;

    fn kind(&self) -> UserOperationKind {
        match self {
            UserOperation::LoginUser { .. } => UserOperationKind::LoginUser,
            UserOperation::RefreshUser { .. } => UserOperationKind::RefreshUser,
            UserOperation::SetAlias { .. } => UserOperationKind::SetAlias,
            UserOperation::DeleteAlias { .. } => UserOperationKind::DeleteAlias,
            UserOperation::SetTag { .. } => UserOperationKind::SetTag,
            UserOperation::DeleteTag { .. } => UserOperationKind::DeleteTag,
            UserOperation::SetProperty { .. } => UserOperationKind::SetProperty,
            UserOperation::TrackSessionStart { .. } => UserOperationKind::TrackSessionStart,
            UserOperation::TrackSessionEnd { .. } => UserOperationKind::TrackSessionEnd,
            UserOperation::CreateSubscription { .. } => UserOperationKind::CreateSubscription,
            UserOperation::UpdateSubscription { .. } => UserOperationKind::UpdateSubscription,
            UserOperation::DeleteSubscription { .. } => UserOperationKind::DeleteSubscription,
            UserOperation::TransferSubscription { .. } => UserOperationKind::TransferSubscription,
        }
    }

    fn apply_to_record_id(&self) -> &str {
        match self {
            UserOperation::LoginUser {
                existing_onesignal_id: Some(existing),
                ..
            } => existing.as_str(),
            UserOperation::UpdateSubscription {
                subscription_id, ..
            }
            | UserOperation::DeleteSubscription {
                subscription_id, ..
            }
            | UserOperation::TransferSubscription {
                subscription_id, ..
            } => subscription_id.as_str(),
            _ => self.onesignal_id(),
        }
    }

    fn create_comparison_key(&self) -> String {
        match self {
            UserOperation::RefreshUser { .. } => format!("{}.Refresh", self.user_key()),
            UserOperation::SetAlias { label, .. } | UserOperation::DeleteAlias { label, .. } => {
                format!("{}.Identity.{label}", self.user_key())
            }
            UserOperation::TransferSubscription {
                app_id,
                subscription_id,
                ..
            } => format!("{app_id}.Subscription.{subscription_id}.Transfer"),
            // A create request has no room for session deltas.
            UserOperation::TrackSessionStart { .. } | UserOperation::TrackSessionEnd { .. } => {
                String::new()
            }
            _ => self.user_key(),
        }
    }

    fn modify_comparison_key(&self) -> String {
        match self {
            UserOperation::LoginUser { .. } => String::new(),
            UserOperation::CreateSubscription { .. }
            | UserOperation::UpdateSubscription { .. }
            | UserOperation::DeleteSubscription { .. } => self.subscription_key(),
            UserOperation::RefreshUser { .. }
            | UserOperation::SetAlias { .. }
            | UserOperation::DeleteAlias { .. }
            | UserOperation::TransferSubscription { .. } => self.create_comparison_key(),
            _ => self.user_key(),
        }
    }

    fn group_comparison_type(&self) -> GroupComparisonType {
        match self {
            UserOperation::LoginUser { .. } => GroupComparisonType::Create,
            UserOperation::RefreshUser { .. }
            | UserOperation::DeleteSubscription { .. }
            | UserOperation::TransferSubscription { .. } => GroupComparisonType::None,
            _ => GroupComparisonType::Alter,
        }
    }

    fn can_start_execute(&self) -> bool {
        match self {
            UserOperation::LoginUser {
                existing_onesignal_id,
                ..
            } => !existing_onesignal_id.as_deref().is_some_and(is_local_id),
            UserOperation::UpdateSubscription { .. }
            | UserOperation::DeleteSubscription { .. }
            | UserOperation::TransferSubscription { .. } => {
                !is_local_id(self.onesignal_id())
                    && !self.subscription_id().is_some_and(is_local_id)
            }
            _ => !is_local_id(self.onesignal_id()),
        }
    }

    fn translate_ids(&mut self, translations: &HashMap<String, String>) {
        if let UserOperation::LoginUser {
            existing_onesignal_id: Some(existing),
            ..
        } = self
        {
            translate(existing, translations);
        }
        match self {
            UserOperation::LoginUser { onesignal_id, .. }
            | UserOperation::RefreshUser { onesignal_id, .. }
            | UserOperation::SetAlias { onesignal_id, .. }
            | UserOperation::DeleteAlias { onesignal_id, .. }
            | UserOperation::SetTag { onesignal_id, .. }
            | UserOperation::DeleteTag { onesignal_id, .. }
            | UserOperation::SetProperty { onesignal_id, .. }
            | UserOperation::TrackSessionStart { onesignal_id, .. }
            | UserOperation::TrackSessionEnd { onesignal_id, .. } => {
                translate(onesignal_id, translations);
            }
            UserOperation::CreateSubscription {
                onesignal_id,
                subscription_id,
                ..
            }
            | UserOperation::UpdateSubscription {
                onesignal_id,
                subscription_id,
                ..
            }
            | UserOperation::DeleteSubscription {
                onesignal_id,
                subscription_id,
                ..
            }
            | UserOperation::TransferSubscription {
                onesignal_id,
                subscription_id,
                ..
            } => {
                translate(onesignal_id, translations);
                translate(subscription_id, translations);
            }
        }
    }
}
