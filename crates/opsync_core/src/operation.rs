//! The operation contract.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Which comparison key decides whether two operations may share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupComparisonType {
    /// Group by `create_comparison_key`.
    Create,
    /// Group by `modify_comparison_key`.
    Alter,
    /// Never grouped with anything.
    None,
}

/// A unit of pending backend work.
///
/// Operations are plain serializable values; everything the repository
/// needs to schedule them is derived from their fields. Implementors are
/// usually a single enum covering every kind the application knows.
pub trait Operation:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Closed set of operation kinds. `Display` yields the kind name.
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Returns the kind, used to route the operation to its executor.
    fn kind(&self) -> Self::Kind;

    /// Returns the id of the record this operation targets.
    fn apply_to_record_id(&self) -> &str;

    /// Grouping key used when the head operation groups by create.
    fn create_comparison_key(&self) -> String;

    /// Grouping key used when the head operation groups by alter.
    fn modify_comparison_key(&self) -> String;

    /// Returns how this operation groups when it heads a batch.
    fn group_comparison_type(&self) -> GroupComparisonType;

    /// Returns false while the operation still depends on an id the backend
    /// has not assigned yet.
    fn can_start_execute(&self) -> bool;

    /// Rewrites local ids found in `translations` to their backend values.
    fn translate_ids(&mut self, translations: &HashMap<String, String>);

    /// Returns the grouping key selected by `comparison`, or `None` when the
    /// comparison never groups.
    fn comparison_key(&self, comparison: GroupComparisonType) -> Option<String> {
        match comparison {
            GroupComparisonType::Create => Some(self.create_comparison_key()),
            GroupComparisonType::Alter => Some(self.modify_comparison_key()),
            GroupComparisonType::None => None,
        }
    }
}
