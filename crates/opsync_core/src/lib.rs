//! # opsync core
//!
//! Model stores and the durable operation queue for opsync.
//!
//! This crate provides:
//! - [`Model`], [`ModelStore`] and [`SingletonModelStore`]: observable,
//!   persisted property bags emitting tagged change events
//! - The [`Operation`] contract and the typed [`ExecutorRegistry`]
//! - [`OperationRepo`]: the durable queue that batches, executes, retries
//!   and translates identifiers of pending operations
//! - Listener bindings turning model events into operations
//! - Startup [`RecoveryCheck`]s for known bad persisted states
//!
//! ## Architecture
//!
//! ```text
//! app call -> Model::set -> ModelStore event -> listener -> OperationRepo::enqueue
//!                                                                  |
//!              executor result <- OperationExecutor::execute <- loop
//! ```
//!
//! ## Key Invariants
//!
//! - `HYDRATE` tagged changes never produce operations
//! - The queue is persisted after every mutation
//! - Identifier translations are applied to the whole queue
//! - The execution loop never returns an error to callers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod executor;
mod id;
mod listener;
mod model;
mod operation;
mod recovery;
mod repo;

pub use config::OperationRepoConfig;
pub use error::{SyncError, SyncResult};
pub use executor::{ExecutionResponse, ExecutionResult, ExecutorRegistry, OperationExecutor};
pub use id::{create_local_id, is_local_id, LOCAL_ID_PREFIX};
pub use listener::{
    bootstrap_listener, bootstrap_singleton_listener, ListenerHandle, ModelStoreListener,
    OperationQueue, SingletonModelStoreListener,
};
pub use model::{
    EventProducer, Model, ModelChangeTag, ModelChangedArgs, ModelChangedHandler, ModelStore,
    ModelStoreChangeHandler, SingletonModelStore, SingletonModelStoreChangeHandler, TypedModel,
    SINGLETON_ID,
};
pub use operation::{GroupComparisonType, Operation};
pub use recovery::{RecoveryCheck, RecoveryReport, RecoveryRunner};
pub use repo::{
    load_persisted_operations, NewRecordsState, OperationRepo, PersistedOperation,
    OPERATIONS_STORE_KEY,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
