//! Dump queue command implementation.

use super::{open_storage, read_queue, CommandResult};
use opsync_core::Operation;
use opsync_storage::StorageBackend;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Queue entry representation for output.
#[derive(Debug, Serialize)]
pub struct QueueEntryInfo {
    /// Position in the queue.
    pub position: usize,
    /// Queue item id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Operation kind (if decodable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Target user (if decodable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onesignal_id: Option<String>,
    /// Decode error (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The persisted operation as stored.
    pub operation: Value,
}

/// Runs the dump-queue command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> CommandResult<()> {
    let storage = open_storage(path)?;
    let entries = collect(&storage, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

/// Reads up to `limit` queue entries from `storage`, in queue order.
pub fn collect(
    storage: &dyn StorageBackend,
    limit: Option<usize>,
) -> CommandResult<Vec<QueueEntryInfo>> {
    let max_entries = limit.unwrap_or(usize::MAX);
    Ok(read_queue(storage)?
        .into_iter()
        .take(max_entries)
        .map(|entry| {
            let id = entry.raw.get("id").and_then(Value::as_str).map(str::to_string);
            let operation = entry.raw.get("operation").cloned().unwrap_or(Value::Null);
            match entry.operation {
                Ok(op) => QueueEntryInfo {
                    position: entry.position,
                    id,
                    kind: Some(op.kind().to_string()),
                    onesignal_id: Some(op.onesignal_id().to_string()),
                    error: None,
                    operation,
                },
                Err(e) => QueueEntryInfo {
                    position: entry.position,
                    id,
                    kind: None,
                    onesignal_id: None,
                    error: Some(e),
                    operation,
                },
            }
        })
        .collect())
}

fn print_text_output(entries: &[QueueEntryInfo]) {
    println!("Queued Operations ({} shown)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!("[{:04}]", entry.position);
        match (&entry.kind, &entry.error) {
            (Some(kind), _) => print!(" {:22}", kind),
            (None, Some(error)) => print!(" {:22} error={}", "UNDECODABLE", error),
            (None, None) => print!(" {:22}", "UNKNOWN"),
        }
        if let Some(onesignal_id) = &entry.onesignal_id {
            print!(" user={}", onesignal_id);
        }
        if let Some(id) = &entry.id {
            print!(" id={}...", &id[..8.min(id.len())]);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;

    #[test]
    fn collect_keeps_queue_order() {
        let storage = fixtures::storage();
        let entries = collect(&storage, None).unwrap();

        let kinds: Vec<_> = entries.iter().map(|e| e.kind.as_deref()).collect();
        assert_eq!(kinds, [Some("set-tag"), Some("delete-subscription"), None]);
        assert_eq!(entries[0].onesignal_id.as_deref(), Some("local-u1"));
        assert!(entries[2].error.is_some());
        assert_eq!(entries[2].operation["name"], "launch-rockets");
    }

    #[test]
    fn collect_honors_limit() {
        let storage = fixtures::storage();
        let entries = collect(&storage, Some(1)).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].id.as_deref(),
            Some("6f1c2b8e-7b1d-4a39-9a7e-0c1f4b7d2a10")
        );
    }
}
