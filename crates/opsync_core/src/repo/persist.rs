//! Durable form of the operation queue.

use crate::error::SyncResult;
use crate::operation::Operation;
use opsync_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Storage key of the persisted operation queue.
pub const OPERATIONS_STORE_KEY: &str = "operations";

/// One persisted queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedOperation<O> {
    /// Queue item id, stable across restarts.
    pub id: Uuid,
    /// The pending operation.
    pub operation: O,
}

/// Loads the queue persisted under `key`, in queue order.
///
/// Entries that no longer decode (for example an operation kind that was
/// removed) are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the storage read fails or the blob is not a JSON
/// array.
pub fn load_persisted_operations<O: Operation>(
    storage: &dyn StorageBackend,
    key: &str,
) -> SyncResult<Vec<PersistedOperation<O>>> {
    let Some(bytes) = storage.read(key)? else {
        return Ok(Vec::new());
    };
    let entries: Vec<Value> = serde_json::from_slice(&bytes)?;
    let mut loaded = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<PersistedOperation<O>>(entry) {
            Ok(op) => loaded.push(op),
            Err(e) => warn!(index, error = %e, "skipping undecodable persisted operation"),
        }
    }
    Ok(loaded)
}

pub(crate) fn save_persisted_operations<O: Operation>(
    storage: &dyn StorageBackend,
    key: &str,
    operations: &[PersistedOperation<O>],
) -> SyncResult<()> {
    let bytes = serde_json::to_vec(operations)?;
    storage.write(key, &bytes)?;
    Ok(())
}
