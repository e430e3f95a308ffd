//! Inspect command implementation.

use super::{open_storage, read_queue, read_store, CommandResult};
use opsync_core::Operation;
use opsync_storage::StorageBackend;
use opsync_user::{EXTERNAL_ID, IDENTITY_STORE, ONESIGNAL_ID, PROPERTIES_STORE, SUBSCRIPTIONS_STORE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Storage inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage path.
    pub path: String,
    /// Every key holding a blob.
    pub keys: Vec<String>,
    /// Current user id, possibly local.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onesignal_id: Option<String>,
    /// Current external id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Model count per user store.
    pub stores: BTreeMap<String, usize>,
    /// Total queued operations.
    pub queued: usize,
    /// Queued operations per kind.
    pub queued_by_kind: BTreeMap<String, usize>,
    /// Queue entries that no longer decode.
    pub undecodable: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let storage = open_storage(path)?;
    let mut result = collect(&storage)?;
    result.path = path.display().to_string();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the inspection result from `storage`.
pub fn collect(storage: &dyn StorageBackend) -> CommandResult<InspectResult> {
    let identity = read_store(storage, IDENTITY_STORE)?;
    let current = identity.first();
    let field = |name: &str| {
        current
            .and_then(|m| m.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let mut stores = BTreeMap::new();
    for name in [IDENTITY_STORE, PROPERTIES_STORE, SUBSCRIPTIONS_STORE] {
        stores.insert(name.to_string(), read_store(storage, name)?.len());
    }

    let queue = read_queue(storage)?;
    let mut queued_by_kind = BTreeMap::new();
    let mut undecodable = 0;
    for entry in &queue {
        match &entry.operation {
            Ok(op) => *queued_by_kind.entry(op.kind().to_string()).or_insert(0) += 1,
            Err(_) => undecodable += 1,
        }
    }

    Ok(InspectResult {
        path: String::new(),
        keys: storage.keys()?,
        onesignal_id: field(ONESIGNAL_ID),
        external_id: field(EXTERNAL_ID),
        stores,
        queued: queue.len(),
        queued_by_kind,
        undecodable,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("opsync Storage Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Keys: {}", result.keys.join(", "));
    println!();
    println!("User:");
    println!(
        "  onesignal_id: {}",
        result.onesignal_id.as_deref().unwrap_or("-")
    );
    println!(
        "  external_id:  {}",
        result.external_id.as_deref().unwrap_or("-")
    );
    println!();
    println!("Stores:");
    for (name, count) in &result.stores {
        println!("  {:14} {} models", name, count);
    }
    println!();
    println!("Queue: {} operations", result.queued);
    for (kind, count) in &result.queued_by_kind {
        println!("  {:22} {}", kind, count);
    }
    if result.undecodable > 0 {
        println!("  {:22} {}", "(undecodable)", result.undecodable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;

    #[test]
    fn collect_summarizes_stores_and_queue() {
        let storage = fixtures::storage();
        let result = collect(&storage).unwrap();

        assert_eq!(result.onesignal_id.as_deref(), Some("local-u1"));
        assert_eq!(result.external_id.as_deref(), Some("alice"));
        assert_eq!(result.stores[IDENTITY_STORE], 1);
        assert_eq!(result.stores[PROPERTIES_STORE], 0);
        assert_eq!(result.stores[SUBSCRIPTIONS_STORE], 1);
        assert_eq!(result.queued, 3);
        assert_eq!(result.queued_by_kind["set-tag"], 1);
        assert_eq!(result.queued_by_kind["delete-subscription"], 1);
        assert_eq!(result.undecodable, 1);
    }

    #[test]
    fn run_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&dir.path().join("absent"), "text").is_err());
    }
}
