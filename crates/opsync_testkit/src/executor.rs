//! A scripted executor that records what it was asked to do.

use crate::operations::{TestKind, TestOperation};
use async_trait::async_trait;
use opsync_core::{is_local_id, ExecutionResponse, ExecutionResult, OperationExecutor};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// One executed batch.
#[derive(Debug, Clone)]
pub struct ExecutedBatch {
    /// When the executor was called.
    pub at: Instant,
    /// The batch, head first.
    pub operations: Vec<TestOperation>,
}

/// Answers each call with the next scripted response, or success.
///
/// A batch headed by a create of a local id is answered with a translation
/// to `remote-<n>` unless a response was scripted.
pub struct ScriptedExecutor {
    kinds: Vec<TestKind>,
    script: Mutex<VecDeque<ExecutionResponse<TestOperation>>>,
    batches: Mutex<Vec<ExecutedBatch>>,
    calls: watch::Sender<usize>,
}

impl ScriptedExecutor {
    /// An executor for `kinds`.
    pub fn new(kinds: Vec<TestKind>) -> Arc<Self> {
        let (calls, _) = watch::channel(0);
        Arc::new(Self {
            kinds,
            script: Mutex::new(VecDeque::new()),
            batches: Mutex::new(Vec::new()),
            calls,
        })
    }

    /// An executor for every [`TestKind`].
    pub fn all_kinds() -> Arc<Self> {
        Self::new(vec![TestKind::Create, TestKind::Update, TestKind::Delete])
    }

    /// Queues the response for the next unscripted call.
    pub fn push_response(&self, response: ExecutionResponse<TestOperation>) {
        self.script.lock().push_back(response);
    }

    /// Queues a bare result.
    pub fn push_result(&self, result: ExecutionResult) {
        self.push_response(ExecutionResponse::new(result));
    }

    /// Every batch executed so far.
    pub fn batches(&self) -> Vec<ExecutedBatch> {
        self.batches.lock().clone()
    }

    /// Labels of every batch executed so far.
    pub fn labels(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .iter()
            .map(|b| b.operations.iter().map(|o| o.label.clone()).collect())
            .collect()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        *self.calls.borrow()
    }

    /// Waits until the executor has been called `count` times.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut calls = self.calls.subscribe();
        calls
            .wait_for(|n| *n >= count)
            .await
            .expect("executor dropped");
    }
}

#[async_trait]
impl OperationExecutor<TestOperation> for ScriptedExecutor {
    fn operations(&self) -> Vec<TestKind> {
        self.kinds.clone()
    }

    async fn execute(&self, operations: Vec<TestOperation>) -> ExecutionResponse<TestOperation> {
        let call = {
            let mut batches = self.batches.lock();
            batches.push(ExecutedBatch {
                at: Instant::now(),
                operations: operations.clone(),
            });
            batches.len()
        };
        self.calls.send_replace(call);

        if let Some(response) = self.script.lock().pop_front() {
            return response;
        }
        match operations.first() {
            Some(head) if head.kind == TestKind::Create && is_local_id(&head.record_id) => {
                let translations =
                    HashMap::from([(head.record_id.clone(), format!("remote-{call}"))]);
                ExecutionResponse::success().with_id_translations(translations)
            }
            _ => ExecutionResponse::success(),
        }
    }
}
