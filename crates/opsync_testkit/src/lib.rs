//! # opsync Testkit
//!
//! Test utilities for opsync.
//!
//! This crate provides:
//! - Storage fixtures backed by temporary directories
//! - [`TestOperation`], a minimal operation type for exercising the queue
//! - [`ScriptedExecutor`], an executor answering from a script and
//!   recording every batch
//! - Property-based test generators using proptest
//! - A user runtime harness over the mock backend
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opsync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_queue() {
//!     let executor = ScriptedExecutor::all_kinds();
//!     let repo = test_repo(executor.clone(), None);
//!     repo.start();
//!     assert!(repo.enqueue_and_wait(TestOperation::create("local-1"), true).await);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod executor;
pub mod fixtures;
pub mod generators;
pub mod operations;
pub mod user;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::executor::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::operations::*;
    pub use crate::user::*;
}

pub use executor::*;
pub use fixtures::*;
pub use generators::*;
pub use operations::*;
pub use user::*;
