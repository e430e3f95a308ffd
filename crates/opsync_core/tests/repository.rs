//! Integration tests for the operation repository.

use opsync_core::{
    load_persisted_operations, ExecutionResponse, ExecutionResult, PersistedOperation,
    OPERATIONS_STORE_KEY,
};
use opsync_storage::{InMemoryBackend, StorageBackend};
use opsync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn labels(ops: &[TestOperation]) -> Vec<String> {
    ops.iter().map(|o| o.label.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn grouped_updates_execute_as_one_batch_in_order() {
    let executor = ScriptedExecutor::all_kinds();
    let repo = test_repo(executor.clone(), None);
    repo.start();
    repo.await_initialized().await;

    repo.enqueue(TestOperation::update("r1", "a"), false);
    repo.enqueue(TestOperation::update("r1", "b"), false);
    repo.enqueue(TestOperation::update("r2", "x"), false);
    repo.enqueue(TestOperation::update("r1", "c"), false);
    assert!(repo.enqueue_and_wait(TestOperation::update("r1", "d"), true).await);

    executor.wait_for_calls(2).await;
    assert_eq!(
        executor.labels(),
        vec![vec!["a", "b", "c", "d"], vec!["x"]]
    );
}

#[tokio::test(start_paused = true)]
async fn id_translation_reaches_queued_operations() {
    let executor = ScriptedExecutor::all_kinds();
    let config = opsync_core::OperationRepoConfig::default().with_max_batch_size(1);
    let repo = test_repo_with_config(executor.clone(), None, config);
    repo.start();
    repo.await_initialized().await;

    repo.enqueue(TestOperation::create("local-1"), false);
    assert!(
        repo.enqueue_and_wait(TestOperation::update("local-1", "tag"), true)
            .await
    );

    let batches = executor.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].operations[0].record_id, "local-1");
    assert_eq!(batches[1].operations[0].record_id, "remote-1");
    // A freshly created record is left alone for the post-create delay.
    assert!(batches[1].at - batches[0].at >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn create_then_update_scenario() {
    let executor = ScriptedExecutor::all_kinds();
    executor.push_response(
        ExecutionResponse::new(ExecutionResult::SuccessStartingOnly).with_id_translations(
            HashMap::from([("L1".to_string(), "R1".to_string())]),
        ),
    );
    let repo = test_repo(executor.clone(), None);
    repo.start();
    repo.await_initialized().await;

    repo.enqueue(TestOperation::create("L1"), false);
    assert!(
        repo.enqueue_and_wait(TestOperation::update("L1", "k=v"), true)
            .await
    );

    let batches = executor.batches();
    assert_eq!(labels(&batches[0].operations), ["create L1", "k=v"]);
    assert_eq!(batches[1].operations, vec![TestOperation::update("R1", "k=v")]);
}

#[tokio::test(start_paused = true)]
async fn queued_operation_survives_restart() {
    let storage = TempStorage::new();

    let first = ScriptedExecutor::all_kinds();
    let repo = test_repo(first.clone(), Some(storage.shared()));
    repo.start();
    repo.await_initialized().await;
    repo.enqueue(TestOperation::update("r1", "persisted"), false);
    repo.stop();
    assert_eq!(first.call_count(), 0);

    let second = ScriptedExecutor::all_kinds();
    let restarted = test_repo(second.clone(), Some(storage.reopen()));
    restarted.start();
    restarted.await_initialized().await;
    assert_eq!(labels(&restarted.pending_operations()), ["persisted"]);

    restarted.force_execute_operations();
    second.wait_for_calls(1).await;
    assert_eq!(second.labels(), vec![vec!["persisted"]]);
}

#[tokio::test(start_paused = true)]
async fn enqueue_before_initialization_is_neither_lost_nor_duplicated() {
    let saved = vec![PersistedOperation {
        id: Uuid::new_v4(),
        operation: TestOperation::update("r1", "saved"),
    }];
    let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::with_blobs([(
        OPERATIONS_STORE_KEY,
        serde_json::to_vec(&saved).unwrap(),
    )]));
    let executor = ScriptedExecutor::all_kinds();
    let repo = test_repo(executor.clone(), Some(storage.clone()));

    repo.enqueue(TestOperation::update("r1", "early"), false);
    repo.start();
    repo.await_initialized().await;

    assert_eq!(labels(&repo.pending_operations()), ["saved", "early"]);
    let persisted =
        load_persisted_operations::<TestOperation>(storage.as_ref(), OPERATIONS_STORE_KEY)
            .unwrap();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].id, saved[0].id);

    repo.force_execute_operations();
    executor.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(executor.labels(), vec![vec!["saved", "early"]]);
    assert!(repo.is_empty());
}

#[tokio::test(start_paused = true)]
async fn success_starting_only_requeues_the_rest() {
    let executor = ScriptedExecutor::all_kinds();
    executor.push_result(ExecutionResult::SuccessStartingOnly);
    let repo = test_repo(executor.clone(), None);
    repo.start();
    repo.await_initialized().await;

    repo.enqueue(TestOperation::update("r1", "a"), false);
    repo.enqueue(TestOperation::update("r1", "b"), false);
    assert!(repo.enqueue_and_wait(TestOperation::update("r1", "c"), true).await);

    assert_eq!(
        executor.labels(),
        vec![vec!["a", "b", "c"], vec!["b", "c"]]
    );
}

#[tokio::test(start_paused = true)]
async fn conflict_drops_only_the_starting_operation() {
    let executor = ScriptedExecutor::all_kinds();
    executor.push_result(ExecutionResult::FailConflict);
    let repo = test_repo(executor.clone(), None);
    repo.start();
    repo.await_initialized().await;

    let (first, second) = tokio::join!(
        repo.enqueue_and_wait(TestOperation::update("r1", "a"), false),
        repo.enqueue_and_wait(TestOperation::update("r1", "b"), true),
    );

    assert!(!first);
    assert!(second);
    assert_eq!(executor.labels(), vec![vec!["a", "b"], vec!["b"]]);
}

#[tokio::test(start_paused = true)]
async fn retry_after_is_honored() {
    let executor = ScriptedExecutor::all_kinds();
    executor.push_response(
        ExecutionResponse::new(ExecutionResult::FailRetry).with_retry_after(Some(60)),
    );
    let repo = test_repo(executor.clone(), None);
    repo.start();
    repo.await_initialized().await;

    assert!(repo.enqueue_and_wait(TestOperation::update("r1", "a"), true).await);

    let batches = executor.batches();
    assert_eq!(batches.len(), 2);
    assert!(batches[1].at - batches[0].at >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn contains_instance_of_sees_queued_kinds() {
    let executor = ScriptedExecutor::all_kinds();
    let repo = test_repo(executor, None);
    repo.enqueue(TestOperation::delete("r1"), false);

    assert!(repo.contains_instance_of(TestKind::Delete));
    assert!(!repo.contains_instance_of(TestKind::Create));
}

fn run_to_completion(ops: Vec<TestOperation>) -> Vec<Vec<TestOperation>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    runtime.block_on(async move {
        let executor = ScriptedExecutor::all_kinds();
        let repo = test_repo(executor.clone(), None);
        repo.start();
        repo.await_initialized().await;
        for op in ops {
            repo.enqueue(op, false);
        }
        assert!(
            repo.enqueue_and_wait(TestOperation::delete("sentinel"), true)
                .await
        );
        repo.stop();
        executor
            .batches()
            .into_iter()
            .map(|b| b.operations)
            .filter(|ops| ops[0].record_id != "sentinel")
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_operation_runs_once_in_record_order(ops in operation_sequence_strategy()) {
        let batches = run_to_completion(ops.clone());
        let executed: Vec<TestOperation> = batches.iter().flatten().cloned().collect();
        prop_assert_eq!(executed.len(), ops.len());

        for batch in &batches {
            let record = &batch[0].record_id;
            prop_assert!(batch.iter().all(|o| &o.record_id == record));
        }

        let mut records: Vec<&String> = ops.iter().map(|o| &o.record_id).collect();
        records.dedup();
        for record in records {
            let expected: Vec<_> = ops.iter().filter(|o| &o.record_id == record).collect();
            let actual: Vec<_> = executed.iter().filter(|o| &o.record_id == record).collect();
            prop_assert_eq!(expected, actual);
        }
    }
}
