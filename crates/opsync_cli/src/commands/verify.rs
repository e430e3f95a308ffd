//! Verify command implementation.

use super::{open_storage, read_queue, read_store, CommandResult};
use opsync_core::is_local_id;
use opsync_storage::StorageBackend;
use opsync_user::{IDENTITY_STORE, ONESIGNAL_ID, PROPERTIES_STORE, SUBSCRIPTIONS_STORE};
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of queue entries checked.
    pub operations_checked: usize,
    /// Stores or queue entries that could not be decoded.
    pub errors: Vec<String>,
    /// Queued operations referencing local ids nothing holds anymore.
    ///
    /// These still execute, so they are reported without failing.
    pub stale_references: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CommandResult<()> {
    println!("Verifying storage at {:?}", path);
    println!();

    let storage = open_storage(path)?;
    let result = verify(&storage)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Storage verification passed");
        Ok(())
    } else {
        println!("✗ Storage verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every user store and the queue in `storage`.
pub fn verify(storage: &dyn StorageBackend) -> CommandResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let mut held = HashSet::new();

    for name in [IDENTITY_STORE, PROPERTIES_STORE, SUBSCRIPTIONS_STORE] {
        match read_store(storage, name) {
            Ok(models) => {
                for model in models {
                    let id_property = if name == SUBSCRIPTIONS_STORE {
                        "id"
                    } else {
                        ONESIGNAL_ID
                    };
                    if let Some(id) = model.get(id_property).and_then(|v| v.as_str()) {
                        held.insert(id.to_string());
                    }
                }
            }
            Err(e) => result.errors.push(format!("store {name}: {e}")),
        }
    }

    let queue = match read_queue(storage) {
        Ok(queue) => queue,
        Err(e) => {
            result.errors.push(format!("operation queue: {e}"));
            return Ok(result);
        }
    };
    for entry in queue {
        result.operations_checked += 1;
        match entry.operation {
            Ok(op) => {
                for id in op.referenced_ids() {
                    if is_local_id(id) && !held.contains(id) {
                        result.stale_references.push(format!(
                            "operation {} references unknown local id {id}",
                            entry.position
                        ));
                    }
                }
            }
            Err(e) => result
                .errors
                .push(format!("operation {}: {e}", entry.position)),
        }
    }

    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Operations checked: {}", result.operations_checked);
    println!("  Errors:             {}", result.errors.len());
    println!("  Stale references:   {}", result.stale_references.len());

    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
    for warning in &result.stale_references {
        println!("    WARN:  {}", warning);
    }
}
