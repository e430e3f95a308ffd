//! Property-based test generators using proptest.

use crate::operations::TestOperation;
use proptest::prelude::*;

/// Strategy for backend record ids.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex")
}

/// Strategy for a single update or delete against one of `records`.
pub fn record_operation_strategy(records: Vec<String>) -> impl Strategy<Value = TestOperation> {
    (prop::sample::select(records), any::<u16>(), any::<bool>()).prop_map(
        |(record, marker, delete)| {
            if delete && marker % 8 == 0 {
                TestOperation::delete(&record)
            } else {
                TestOperation::update(&record, &format!("{record}#{marker}"))
            }
        },
    )
}

/// Strategy for a queue of updates spread over a few records.
///
/// Labels are unique, so relative order can be checked after grouping.
pub fn operation_sequence_strategy() -> impl Strategy<Value = Vec<TestOperation>> {
    prop::collection::vec(record_id_strategy(), 1..4)
        .prop_flat_map(|records| {
            prop::collection::vec(record_operation_strategy(records), 1..40)
        })
        .prop_map(|mut ops| {
            for (i, op) in ops.iter_mut().enumerate() {
                op.label = format!("{}@{i}", op.label);
            }
            ops
        })
}
