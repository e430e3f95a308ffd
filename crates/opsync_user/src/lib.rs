//! # opsync user
//!
//! User state sync built on `opsync_core`.
//!
//! This crate provides:
//! - Identity, properties and subscription models and their stores
//! - [`UserOperation`]: every backend change a user edit can cause
//! - Listeners deriving operations from `Normal` model changes
//! - Executors performing operations against a [`UserBackend`]
//! - The [`RecoverFromDroppedLoginBug`] startup check
//! - [`UserManager`], the application-facing API, and
//!   [`UserSyncRuntime`], which wires everything together
//!
//! ## Architecture
//!
//! ```text
//! UserManager -> stores (identity | properties | subscriptions)
//!                    | Normal events
//!                    v
//!               listeners -> OperationRepo -> executors -> UserBackend
//!                                                 |
//!                          Hydrate writes <-------+
//! ```
//!
//! ## Key Invariants
//!
//! - Users and subscriptions start with local ids; the backend ids replace
//!   them in the models and in every queued operation
//! - Backend responses are written back with the `Hydrate` tag and are never
//!   sent again
//! - A login always waits for its `LoginUser` operation before refreshing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod executors;
mod listeners;
mod manager;
mod models;
mod operations;
mod rebuild;
mod recovery;
mod runtime;

pub use backend::{
    BackendCall, BackendResult, MockUserBackend, PropertiesDeltas, PropertiesObject,
    SubscriptionObject, UserBackend, UserState,
};
pub use config::UserSyncConfig;
pub use error::{BackendError, ResponseStatusType, UserError, UserResult};
pub use executors::{
    user_executors, ExecutorContext, IdentityExecutor, LoginUserExecutor, RefreshUserExecutor,
    SubscriptionExecutor, UpdateUserExecutor,
};
pub use listeners::{
    IdentityModelStoreListener, PropertiesModelStoreListener, SubscriptionModelStoreListener,
};
pub use manager::UserManager;
pub use models::{
    IdentityModel, PropertiesModel, SubscriptionModel, SubscriptionType, UserStores, EXTERNAL_ID,
    IDENTITY_STORE, ONESIGNAL_ID, PROPERTIES_STORE, STATUS_SUBSCRIBED, SUBSCRIPTIONS_STORE, TAGS,
};
pub use operations::{UserOperation, UserOperationKind};
pub use rebuild::RebuildUserService;
pub use recovery::RecoverFromDroppedLoginBug;
pub use runtime::UserSyncRuntime;
