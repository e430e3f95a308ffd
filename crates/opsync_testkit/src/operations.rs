//! A minimal operation type for queue tests.
//!
//! Mirrors the shapes real operation sets have: a create that groups by
//! create key, updates that group by record, and ungroupable deletes.

use opsync_core::{is_local_id, GroupComparisonType, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of a [`TestOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// Creates a record; may start while the record id is local.
    Create,
    /// Changes a record; waits for a backend id.
    Update,
    /// Removes a record; never grouped.
    Delete,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestKind::Create => "create",
            TestKind::Update => "update",
            TestKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// An operation against a record identified by `record_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOperation {
    /// The kind.
    pub kind: TestKind,
    /// Target record, possibly a local id.
    pub record_id: String,
    /// Free-form marker to tell operations apart in assertions.
    pub label: String,
}

impl TestOperation {
    /// A create of `record_id`.
    pub fn create(record_id: &str) -> Self {
        Self {
            kind: TestKind::Create,
            record_id: record_id.to_string(),
            label: format!("create {record_id}"),
        }
    }

    /// An update of `record_id` labelled `label`.
    pub fn update(record_id: &str, label: &str) -> Self {
        Self {
            kind: TestKind::Update,
            record_id: record_id.to_string(),
            label: label.to_string(),
        }
    }

    /// A delete of `record_id`.
    pub fn delete(record_id: &str) -> Self {
        Self {
            kind: TestKind::Delete,
            record_id: record_id.to_string(),
            label: format!("delete {record_id}"),
        }
    }

    fn record_key(&self) -> String {
        format!("record.{}", self.record_id)
    }
}

impl Operation for TestOperation {
    type Kind = TestKind;

    fn kind(&self) -> TestKind {
        self.kind
    }

    fn apply_to_record_id(&self) -> &str {
        &self.record_id
    }

    fn create_comparison_key(&self) -> String {
        self.record_key()
    }

    fn modify_comparison_key(&self) -> String {
        match self.kind {
            TestKind::Create => String::new(),
            _ => self.record_key(),
        }
    }

    fn group_comparison_type(&self) -> GroupComparisonType {
        match self.kind {
            TestKind::Create => GroupComparisonType::Create,
            TestKind::Update => GroupComparisonType::Alter,
            TestKind::Delete => GroupComparisonType::None,
        }
    }

    fn can_start_execute(&self) -> bool {
        self.kind == TestKind::Create || !is_local_id(&self.record_id)
    }

    fn translate_ids(&mut self, translations: &HashMap<String, String>) {
        if let Some(id) = translations.get(&self.record_id) {
            self.record_id = id.clone();
        }
    }
}
