//! # opsync storage
//!
//! Keyed durable blob storage for opsync.
//!
//! Model stores and the operation queue persist themselves as whole
//! serialized blobs under a short key (`identity`, `subscriptions`,
//! `operations`, ...). Storage backends are **opaque byte stores** - they do
//! not interpret the blobs they hold.
//!
//! ## Design Principles
//!
//! - A `write` replaces the blob for a key atomically and durably
//! - No knowledge of models, operations or JSON
//! - Must be `Send + Sync`; callers share one backend across stores
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - One file per key inside a private directory
//!
//! ## Example
//!
//! ```rust
//! use opsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write("identity", b"[]").unwrap();
//! assert_eq!(backend.read("identity").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
