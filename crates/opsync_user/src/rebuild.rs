//! Operations that recreate the current user on the backend.

use crate::models::UserStores;
use crate::operations::UserOperation;
use opsync_core::is_local_id;

/// Rebuilds the backend user when it turned out to be missing.
#[derive(Clone)]
pub struct RebuildUserService {
    app_id: String,
    stores: UserStores,
}

impl RebuildUserService {
    /// Creates the service.
    pub fn new(app_id: impl Into<String>, stores: UserStores) -> Self {
        Self {
            app_id: app_id.into(),
            stores,
        }
    }

    /// Operations recreating `onesignal_id`, or `None` if it is no longer
    /// the current user.
    ///
    /// The result logs the user in again, recreates the push subscription of
    /// this device and refreshes the local models.
    pub fn rebuild_operations(&self, onesignal_id: &str) -> Option<Vec<UserOperation>> {
        if !self.stores.is_current_user(onesignal_id) {
            return None;
        }
        let identity = self.stores.identity.model();
        let mut operations = vec![UserOperation::LoginUser {
            app_id: self.app_id.clone(),
            onesignal_id: onesignal_id.to_string(),
            external_id: identity.external_id(),
            existing_onesignal_id: None,
        }];
        if let Some(push) = self.stores.push_subscription() {
            operations.push(UserOperation::CreateSubscription {
                app_id: self.app_id.clone(),
                onesignal_id: onesignal_id.to_string(),
                subscription_id: push.subscription_id(),
                subscription_type: push.kind(),
                enabled: push.enabled(),
                address: push.address(),
                status: push.status(),
            });
        }
        if !is_local_id(onesignal_id) {
            operations.push(UserOperation::RefreshUser {
                app_id: self.app_id.clone(),
                onesignal_id: onesignal_id.to_string(),
            });
        }
        Some(operations)
    }
}
