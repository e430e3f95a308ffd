//! Recovery from a login operation that never made it into the queue.

use crate::models::UserStores;
use crate::operations::{UserOperation, UserOperationKind};
use opsync_core::{is_local_id, OperationQueue, RecoveryCheck};

/// Detects a logged-in user that was never created on the backend.
///
/// Older builds could drop the `LoginUser` operation while keeping the
/// local user. Every operation for that user then waits forever on a
/// local id. Re-enqueueing the login unblocks them.
pub struct RecoverFromDroppedLoginBug {
    app_id: String,
    stores: UserStores,
}

impl RecoverFromDroppedLoginBug {
    /// Creates the check.
    pub fn new(app_id: impl Into<String>, stores: UserStores) -> Self {
        Self {
            app_id: app_id.into(),
            stores,
        }
    }
}

impl RecoveryCheck<UserOperation> for RecoverFromDroppedLoginBug {
    fn name(&self) -> &str {
        "recover-from-dropped-login-bug"
    }

    fn is_in_bad_state(&self, queue: &dyn OperationQueue<UserOperation>) -> bool {
        let identity = self.stores.identity.model();
        let Some(onesignal_id) = identity.onesignal_id() else {
            return false;
        };
        identity.external_id().is_some()
            && is_local_id(&onesignal_id)
            && !queue.contains_instance_of(UserOperationKind::LoginUser)
    }

    fn recover(&self, queue: &dyn OperationQueue<UserOperation>) {
        let identity = self.stores.identity.model();
        let Some(onesignal_id) = identity.onesignal_id() else {
            return;
        };
        queue.enqueue(
            UserOperation::LoginUser {
                app_id: self.app_id.clone(),
                onesignal_id,
                external_id: identity.external_id(),
                existing_onesignal_id: None,
            },
            true,
        );
    }

    fn message(&self) -> String {
        "user has an external id and a local onesignal id but no login is queued; re-enqueueing login"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentityModel;
    use async_trait::async_trait;
    use opsync_core::{ModelChangeTag, Operation, RecoveryRunner};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Queue(Mutex<Vec<UserOperation>>);

    #[async_trait]
    impl OperationQueue<UserOperation> for Queue {
        fn enqueue(&self, operation: UserOperation, _flush: bool) {
            self.0.lock().push(operation);
        }
        async fn enqueue_and_wait(&self, operation: UserOperation, flush: bool) -> bool {
            self.enqueue(operation, flush);
            true
        }
        fn contains_instance_of(&self, kind: UserOperationKind) -> bool {
            self.0.lock().iter().any(|o| o.kind() == kind)
        }
    }

    fn stores_with(onesignal_id: &str, external_id: Option<&str>) -> UserStores {
        let stores = UserStores::in_memory();
        stores.identity.replace(
            &IdentityModel::new(onesignal_id, external_id),
            ModelChangeTag::Hydrate,
        );
        stores
    }

    #[test]
    fn re_enqueues_dropped_login_once() {
        let stores = stores_with("local-1", Some("alice"));
        let runner = RecoveryRunner::<UserOperation>::new()
            .with(Arc::new(RecoverFromDroppedLoginBug::new("app", stores)));
        let queue = Queue::default();

        let report = runner.run_now(&queue);
        assert_eq!(report.recovered, ["recover-from-dropped-login-bug"]);
        assert!(matches!(
            &queue.0.lock()[0],
            UserOperation::LoginUser { onesignal_id, external_id: Some(e), .. }
                if onesignal_id == "local-1" && e == "alice"
        ));

        assert!(runner.run_now(&queue).is_clean());
        assert_eq!(queue.0.lock().len(), 1);
    }

    #[test]
    fn healthy_states_are_left_alone() {
        let queue = Queue::default();
        for stores in [
            stores_with("local-1", None),
            stores_with("R1", Some("alice")),
        ] {
            let check = RecoverFromDroppedLoginBug::new("app", stores);
            assert!(!check.is_in_bad_state(&queue));
        }
    }
}
