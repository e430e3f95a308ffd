//! CLI command implementations.

pub mod dump_queue;
pub mod inspect;
pub mod verify;

use opsync_core::OPERATIONS_STORE_KEY;
use opsync_storage::{FileBackend, StorageBackend};
use opsync_user::UserOperation;
use serde_json::{Map, Value};
use std::path::Path;

/// Result type shared by the commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens the storage directory at `path` without creating it.
pub fn open_storage(path: &Path) -> CommandResult<FileBackend> {
    Ok(FileBackend::open_existing(path)?)
}

/// One entry of the persisted queue, decoded if possible.
pub struct QueueEntry {
    /// Position in the queue.
    pub position: usize,
    /// The raw JSON entry.
    pub raw: Value,
    /// The decoded operation, or why decoding failed.
    pub operation: Result<UserOperation, String>,
}

/// Reads the persisted queue entry by entry.
///
/// Unlike the runtime loader, undecodable entries are kept so they can be
/// reported.
pub fn read_queue(storage: &dyn StorageBackend) -> CommandResult<Vec<QueueEntry>> {
    let Some(bytes) = storage.read(OPERATIONS_STORE_KEY)? else {
        return Ok(Vec::new());
    };
    let entries: Vec<Value> = serde_json::from_slice(&bytes)?;
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(position, raw)| {
            let operation = raw
                .get("operation")
                .cloned()
                .ok_or_else(|| "missing operation".to_string())
                .and_then(|op| serde_json::from_value(op).map_err(|e| e.to_string()));
            QueueEntry {
                position,
                raw,
                operation,
            }
        })
        .collect())
}

/// Reads the models persisted under the store `name`.
pub fn read_store(
    storage: &dyn StorageBackend,
    name: &str,
) -> CommandResult<Vec<Map<String, Value>>> {
    match storage.read(name)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(Vec::new()),
    }
}
