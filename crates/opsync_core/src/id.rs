//! Local placeholder identifiers.

use uuid::Uuid;

/// Prefix marking an identifier the backend has not assigned yet.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Creates a new local placeholder identifier.
pub fn create_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

/// Returns true if `id` is a local placeholder.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}
