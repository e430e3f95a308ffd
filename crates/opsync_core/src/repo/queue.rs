//! In-memory queue state and batch selection.

use super::persist::PersistedOperation;
use crate::operation::Operation;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::error;
use uuid::Uuid;

pub(crate) struct QueueItem<O: Operation> {
    pub(crate) id: Uuid,
    pub(crate) operation: O,
    pub(crate) waiter: Option<oneshot::Sender<bool>>,
    pub(crate) retries: u32,
    pub(crate) bucket: u64,
}

impl<O: Operation> QueueItem<O> {
    pub(crate) fn new(operation: O, waiter: Option<oneshot::Sender<bool>>, bucket: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            waiter,
            retries: 0,
            bucket,
        }
    }

    pub(crate) fn restored(persisted: PersistedOperation<O>) -> Self {
        Self {
            id: persisted.id,
            operation: persisted.operation,
            waiter: None,
            retries: 0,
            bucket: 0,
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedOperation<O> {
        PersistedOperation {
            id: self.id,
            operation: self.operation.clone(),
        }
    }
}

/// Everything guarded by the repository lock.
pub(crate) struct QueueState<O: Operation> {
    pub(crate) queue: VecDeque<QueueItem<O>>,
    /// Copies of the batch currently executing; persisted ahead of the queue
    /// so a crash mid-call replays it.
    pub(crate) in_flight: Vec<PersistedOperation<O>>,
    pub(crate) enqueue_bucket: u64,
    pub(crate) execute_bucket: u64,
    pub(crate) initialized: bool,
    pub(crate) paused: bool,
    /// Set once the loop is stopped; waiters can no longer be resolved.
    pub(crate) stopped: bool,
}

impl<O: Operation> QueueState<O> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            enqueue_bucket: 0,
            execute_bucket: 0,
            initialized: false,
            paused: false,
            stopped: false,
        }
    }

    /// Detaches every queued waiter. The operations stay queued.
    pub(crate) fn take_waiters(&mut self) -> Vec<oneshot::Sender<bool>> {
        self.queue
            .iter_mut()
            .filter_map(|item| item.waiter.take())
            .collect()
    }

    /// Puts `items` back at the front, keeping their order.
    pub(crate) fn requeue_front(&mut self, items: Vec<QueueItem<O>>) {
        for item in items.into_iter().rev() {
            self.queue.push_front(item);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<PersistedOperation<O>> {
        self.in_flight
            .iter()
            .cloned()
            .chain(self.queue.iter().map(QueueItem::to_persisted))
            .collect()
    }

    pub(crate) fn contains_kind(&self, kind: O::Kind) -> bool {
        self.queue.iter().any(|i| i.operation.kind() == kind)
            || self.in_flight.iter().any(|p| p.operation.kind() == kind)
    }

    /// Removes the next batch from the queue and marks it in flight.
    ///
    /// The head is the first item of an eligible bucket that can start and
    /// whose record is accessible. Members share the head's comparison key;
    /// they are taken in queue order regardless of bucket.
    pub(crate) fn next_batch(
        &mut self,
        can_access: impl Fn(&str) -> bool,
        max_batch_size: usize,
    ) -> Option<Vec<QueueItem<O>>> {
        let execute_bucket = self.execute_bucket;
        let position = self.queue.iter().position(|item| {
            item.bucket <= execute_bucket
                && item.operation.can_start_execute()
                && can_access(item.operation.apply_to_record_id())
        })?;
        let head = self.queue.remove(position)?;
        let comparison = head.operation.group_comparison_type();
        let start_key = head.operation.comparison_key(comparison);
        let head_kind = head.operation.kind();
        let mut batch = vec![head];

        if let Some(start_key) = start_key {
            let mut index = 0;
            while index < self.queue.len() && batch.len() < max_batch_size {
                let candidate = &self.queue[index].operation;
                let key = candidate.comparison_key(comparison).unwrap_or_default();
                if key.is_empty() && start_key.is_empty() {
                    error!(
                        operation = %head_kind,
                        candidate = %candidate.kind(),
                        "both comparison keys are empty, not grouping"
                    );
                    index += 1;
                    continue;
                }
                if key != start_key || !can_access(candidate.apply_to_record_id()) {
                    index += 1;
                    continue;
                }
                if let Some(member) = self.queue.remove(index) {
                    batch.push(member);
                }
            }
        }

        self.in_flight = batch.iter().map(QueueItem::to_persisted).collect();
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::GroupComparisonType;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Kind;

    impl fmt::Display for Kind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("test")
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Op {
        name: String,
        record: String,
        create_key: String,
        modify_key: String,
        group: GroupComparisonType,
        startable: bool,
    }

    impl Op {
        fn alter(name: &str, key: &str) -> Self {
            Self {
                name: name.into(),
                record: "r".into(),
                create_key: String::new(),
                modify_key: key.into(),
                group: GroupComparisonType::Alter,
                startable: true,
            }
        }
    }

    impl Operation for Op {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            Kind
        }
        fn apply_to_record_id(&self) -> &str {
            &self.record
        }
        fn create_comparison_key(&self) -> String {
            self.create_key.clone()
        }
        fn modify_comparison_key(&self) -> String {
            self.modify_key.clone()
        }
        fn group_comparison_type(&self) -> GroupComparisonType {
            self.group
        }
        fn can_start_execute(&self) -> bool {
            self.startable
        }
        fn translate_ids(&mut self, _translations: &HashMap<String, String>) {}
    }

    fn state_with(ops: Vec<Op>) -> QueueState<Op> {
        let mut state = QueueState::new();
        for op in ops {
            state.queue.push_back(QueueItem::new(op, None, 0));
        }
        state
    }

    fn names(batch: &[QueueItem<Op>]) -> Vec<&str> {
        batch.iter().map(|i| i.operation.name.as_str()).collect()
    }

    #[test]
    fn groups_by_head_key_in_order() {
        let mut state = state_with(vec![
            Op::alter("a1", "A"),
            Op::alter("b1", "B"),
            Op::alter("a2", "A"),
        ]);
        let batch = state.next_batch(|_| true, 100).unwrap();
        assert_eq!(names(&batch), vec!["a1", "a2"]);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.in_flight.len(), 2);
    }

    #[test]
    fn none_comparison_executes_alone() {
        let mut head = Op::alter("n", "A");
        head.group = GroupComparisonType::None;
        let mut state = state_with(vec![head, Op::alter("a", "A")]);
        let batch = state.next_batch(|_| true, 100).unwrap();
        assert_eq!(names(&batch), vec!["n"]);
    }

    #[test]
    fn skips_heads_that_cannot_start() {
        let mut blocked = Op::alter("blocked", "A");
        blocked.startable = false;
        let mut state = state_with(vec![blocked, Op::alter("ready", "B")]);
        let batch = state.next_batch(|_| true, 100).unwrap();
        assert_eq!(names(&batch), vec!["ready"]);
    }

    #[test]
    fn members_need_not_be_startable() {
        let mut member = Op::alter("member", "A");
        member.startable = false;
        let mut state = state_with(vec![Op::alter("head", "A"), member]);
        let batch = state.next_batch(|_| true, 100).unwrap();
        assert_eq!(names(&batch), vec!["head", "member"]);
    }

    #[test]
    fn inaccessible_records_are_skipped() {
        let mut fresh = Op::alter("fresh", "A");
        fresh.record = "new".into();
        let mut state = state_with(vec![fresh, Op::alter("old", "A")]);
        let batch = state.next_batch(|id| id != "new", 100).unwrap();
        assert_eq!(names(&batch), vec!["old"]);
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn later_bucket_cannot_head() {
        let mut state = state_with(vec![]);
        state
            .queue
            .push_back(QueueItem::new(Op::alter("late", "A"), None, 1));
        assert!(state.next_batch(|_| true, 100).is_none());

        state.execute_bucket = 1;
        assert!(state.next_batch(|_| true, 100).is_some());
    }

    #[test]
    fn empty_keys_are_not_grouped() {
        let mut state = state_with(vec![Op::alter("a", ""), Op::alter("b", "")]);
        let batch = state.next_batch(|_| true, 100).unwrap();
        assert_eq!(names(&batch), vec!["a"]);
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn batch_size_is_capped() {
        let ops = (0..5).map(|i| Op::alter(&format!("a{i}"), "A")).collect();
        let mut state = state_with(ops);
        let batch = state.next_batch(|_| true, 3).unwrap();
        assert_eq!(names(&batch), vec!["a0", "a1", "a2"]);
    }

    #[test]
    fn snapshot_puts_in_flight_first() {
        let mut state = state_with(vec![Op::alter("a", "A"), Op::alter("b", "B")]);
        state.next_batch(|_| true, 100).unwrap();
        let snapshot: Vec<_> = state
            .snapshot()
            .into_iter()
            .map(|p| p.operation.name)
            .collect();
        assert_eq!(snapshot, vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn batches_preserve_relative_order(keys in prop::collection::vec(0u8..3, 1..30)) {
            let ops = keys
                .iter()
                .enumerate()
                .map(|(i, k)| Op::alter(&i.to_string(), &k.to_string()))
                .collect();
            let mut state = state_with(ops);
            let mut seen = 0;
            while let Some(batch) = state.next_batch(|_| true, 100) {
                let key = &batch[0].operation.modify_key;
                let indexes: Vec<usize> = batch
                    .iter()
                    .map(|i| i.operation.name.parse().unwrap())
                    .collect();
                prop_assert!(batch.iter().all(|i| &i.operation.modify_key == key));
                prop_assert!(indexes.windows(2).all(|w| w[0] < w[1]));
                seen += batch.len();
            }
            prop_assert_eq!(seen, keys.len());
        }
    }
}
