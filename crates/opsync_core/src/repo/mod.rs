//! The operation repository.
//!
//! [`OperationRepo`] owns the durable queue of pending operations and the
//! single execution loop that drains it. Callers enqueue from any thread;
//! the loop groups queued operations into batches, hands each batch to its
//! executor and applies the response (retries, id translations, follow-up
//! operations) under the queue lock before persisting.

mod new_records;
mod persist;
mod queue;

pub use new_records::NewRecordsState;
pub use persist::{load_persisted_operations, PersistedOperation, OPERATIONS_STORE_KEY};

use crate::config::OperationRepoConfig;
use crate::error::SyncError;
use crate::executor::{ExecutionResponse, ExecutionResult, ExecutorRegistry};
use crate::listener::OperationQueue;
use crate::operation::Operation;
use async_trait::async_trait;
use opsync_storage::StorageBackend;
use parking_lot::Mutex;
use persist::save_persisted_operations;
use queue::{QueueItem, QueueState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct WakeMessage {
    force: bool,
}

struct Shared<O: Operation> {
    config: OperationRepoConfig,
    executors: ExecutorRegistry<O>,
    storage: Option<Arc<dyn StorageBackend>>,
    new_records: Arc<NewRecordsState>,
    state: Mutex<QueueState<O>>,
    wake_tx: mpsc::UnboundedSender<WakeMessage>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<WakeMessage>>>,
    initialized: watch::Sender<bool>,
}

/// Durable queue of pending operations with a single execution loop.
///
/// # Example
///
/// ```rust,ignore
/// let repo = Arc::new(OperationRepo::new(
///     OperationRepoConfig::default(),
///     registry,
///     Some(storage),
///     Arc::new(NewRecordsState::default()),
/// ));
/// repo.start();
/// repo.await_initialized().await;
/// let done = repo.enqueue_and_wait(op, true).await;
/// ```
pub struct OperationRepo<O: Operation> {
    shared: Arc<Shared<O>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<O: Operation> OperationRepo<O> {
    /// Creates a repository. Nothing runs until [`OperationRepo::start`].
    ///
    /// Without storage the queue lives in memory only.
    pub fn new(
        config: OperationRepoConfig,
        executors: ExecutorRegistry<O>,
        storage: Option<Arc<dyn StorageBackend>>,
        new_records: Arc<NewRecordsState>,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (initialized, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                executors,
                storage,
                new_records,
                state: Mutex::new(QueueState::new()),
                wake_tx,
                wake_rx: Mutex::new(Some(wake_rx)),
                initialized,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Loads the persisted queue and starts the execution loop.
    ///
    /// Must be called from within a tokio runtime. Calling it twice logs a
    /// warning and does nothing.
    pub fn start(&self) {
        let Some(wake_rx) = self.shared.wake_rx.lock().take() else {
            warn!("operation repository already started");
            return;
        };
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            shared.load_saved_operations().await;
            shared.process_queue_forever(wake_rx).await;
        });
        self.tasks.lock().push(handle);
    }

    /// Stops the execution loop. Queued operations stay persisted.
    ///
    /// Pending [`OperationRepo::enqueue_and_wait`] calls resolve to false,
    /// as do any made afterwards. A stopped repository cannot be restarted.
    pub fn stop(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        let waiters = {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.take_waiters()
        };
        if !waiters.is_empty() {
            info!(
                count = waiters.len(),
                "operation repository stopped with waiters pending"
            );
        }
        for waiter in waiters {
            let _ = waiter.send(false);
        }
    }

    /// Queues an operation. With `flush` the loop skips its idle wait.
    pub fn enqueue(&self, operation: O, flush: bool) {
        self.shared.enqueue(operation, flush, None);
    }

    /// Queues an operation and waits until its batch reaches a terminal
    /// outcome. Returns true on success.
    ///
    /// Returns false if the repository stops before the outcome is known.
    pub async fn enqueue_and_wait(&self, operation: O, flush: bool) -> bool {
        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(operation, flush, Some(tx));
        rx.await.unwrap_or(false)
    }

    /// Returns true if an operation of `kind` is queued or executing.
    pub fn contains_instance_of(&self, kind: O::Kind) -> bool {
        self.shared.state.lock().contains_kind(kind)
    }

    /// Resolves once the persisted queue has been loaded.
    pub async fn await_initialized(&self) {
        let mut rx = self.shared.initialized.subscribe();
        if rx.wait_for(|ready| *ready).await.is_err() {
            warn!("operation repository dropped before initialization");
        }
    }

    /// Returns true once the persisted queue has been loaded.
    pub fn is_initialized(&self) -> bool {
        *self.shared.initialized.borrow()
    }

    /// Wakes the loop and skips the idle wait.
    pub fn force_execute_operations(&self) {
        self.shared.wake(true);
    }

    /// Lifts the pause caused by an unauthorized response.
    pub fn resume_after_authorization(&self) {
        let was_paused = std::mem::replace(&mut self.shared.state.lock().paused, false);
        if was_paused {
            info!("operation repository resumed after authorization");
        }
        self.shared.wake(true);
    }

    /// Returns true while paused after an unauthorized response.
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Number of queued operations, excluding the executing batch.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Returns true if nothing is queued or executing.
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.queue.is_empty() && state.in_flight.is_empty()
    }

    /// Returns the executing batch followed by the queue, in order.
    pub fn pending_operations(&self) -> Vec<O> {
        self.shared
            .state
            .lock()
            .snapshot()
            .into_iter()
            .map(|p| p.operation)
            .collect()
    }

    /// Returns the shared record-creation tracker.
    pub fn new_records(&self) -> &Arc<NewRecordsState> {
        &self.shared.new_records
    }
}

#[async_trait]
impl<O: Operation> OperationQueue<O> for OperationRepo<O> {
    fn enqueue(&self, operation: O, flush: bool) {
        OperationRepo::enqueue(self, operation, flush);
    }

    async fn enqueue_and_wait(&self, operation: O, flush: bool) -> bool {
        OperationRepo::enqueue_and_wait(self, operation, flush).await
    }

    fn contains_instance_of(&self, kind: O::Kind) -> bool {
        OperationRepo::contains_instance_of(self, kind)
    }
}

impl<O: Operation> Shared<O> {
    fn enqueue(&self, operation: O, flush: bool, mut waiter: Option<oneshot::Sender<bool>>) {
        debug!(operation = %operation.kind(), flush, "enqueue");
        {
            let mut state = self.state.lock();
            if state.stopped {
                warn!(
                    operation = %operation.kind(),
                    error = %SyncError::Shutdown,
                    "queued for the next run only"
                );
                if let Some(waiter) = waiter.take() {
                    let _ = waiter.send(false);
                }
            }
            let item = QueueItem::new(operation, waiter, state.enqueue_bucket);
            state.queue.push_back(item);
            // Until the saved queue is merged in, writing would clobber it.
            if state.initialized {
                self.persist(&state);
            }
        }
        self.wake(flush);
    }

    fn wake(&self, force: bool) {
        // The receiver lives as long as the loop; a send error only means
        // the loop is gone and nothing is left to wake.
        let _ = self.wake_tx.send(WakeMessage { force });
    }

    fn persist(&self, state: &QueueState<O>) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) =
            save_persisted_operations(storage.as_ref(), OPERATIONS_STORE_KEY, &state.snapshot())
        {
            error!(
                error = %e,
                retryable = e.is_retryable(),
                "failed to persist operation queue"
            );
        }
    }

    async fn load_saved_operations(&self) {
        let loaded = match &self.storage {
            Some(storage) => {
                let storage = Arc::clone(storage);
                let result = tokio::task::spawn_blocking(move || {
                    load_persisted_operations::<O>(storage.as_ref(), OPERATIONS_STORE_KEY)
                })
                .await;
                match result {
                    Ok(Ok(loaded)) => loaded,
                    Ok(Err(e)) => {
                        error!(error = %e, "failed to load persisted operations");
                        Vec::new()
                    }
                    Err(e) => {
                        error!(error = %e, "operation loader task failed");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        let has_work = {
            let mut state = self.state.lock();
            let present: HashSet<_> = state.queue.iter().map(|item| item.id).collect();
            let restored: Vec<_> = loaded
                .into_iter()
                .filter(|p| !present.contains(&p.id))
                .map(QueueItem::restored)
                .collect();
            let restored_count = restored.len();
            state.requeue_front(restored);
            state.initialized = true;
            self.persist(&state);
            info!(
                restored = restored_count,
                queued = state.queue.len(),
                "operation queue initialized"
            );
            !state.queue.is_empty()
        };

        self.initialized.send_replace(true);
        if has_work {
            self.wake(false);
        }
    }

    async fn process_queue_forever(&self, mut wake_rx: mpsc::UnboundedReceiver<WakeMessage>) {
        if !self.wait_for_wake(&mut wake_rx).await {
            return;
        }
        self.state.lock().enqueue_bucket += 1;

        loop {
            if self.state.lock().paused {
                debug!("operation repository paused");
                if wake_rx.recv().await.is_none() {
                    return;
                }
                continue;
            }

            let batch = {
                let mut state = self.state.lock();
                state.next_batch(
                    |id| self.new_records.can_access(id),
                    self.config.max_batch_size,
                )
            };

            match batch {
                Some(batch) => {
                    self.execute_batch(batch).await;
                    tokio::time::sleep(self.config.post_wake_delay).await;
                }
                None => {
                    if !self.wait_for_wake(&mut wake_rx).await {
                        return;
                    }
                    let mut state = self.state.lock();
                    state.execute_bucket = state.enqueue_bucket;
                    state.enqueue_bucket += 1;
                }
            }
        }
    }

    /// Waits for the next pass. Returns false if the wake channel closed.
    ///
    /// An empty queue first waits for any enqueue. After that the loop
    /// lingers for `execution_interval` so bursts can group, unless a
    /// forced wake arrives.
    async fn wait_for_wake(&self, wake_rx: &mut mpsc::UnboundedReceiver<WakeMessage>) -> bool {
        let queue_empty = self.state.lock().queue.is_empty();
        if queue_empty {
            match wake_rx.recv().await {
                None => return false,
                Some(message) if message.force => return true,
                Some(_) => {}
            }
        }

        let deadline = Instant::now() + self.config.execution_interval;
        loop {
            match tokio::time::timeout_at(deadline, wake_rx.recv()).await {
                Err(_) => return true,
                Ok(None) => return false,
                Ok(Some(message)) if message.force => return true,
                Ok(Some(_)) => {}
            }
        }
    }

    async fn execute_batch(&self, batch: Vec<QueueItem<O>>) {
        let Some(kind) = batch.first().map(|item| item.operation.kind()) else {
            return;
        };
        let executor = match self.executors.resolve(kind) {
            Ok(executor) => executor,
            Err(e) => {
                error!(operation = %kind, error = %e, "dropping batch");
                self.apply_response(batch, ExecutionResponse::new(ExecutionResult::FailNoRetry));
                return;
            }
        };

        let operations: Vec<O> = batch.iter().map(|item| item.operation.clone()).collect();
        debug!(operation = %kind, count = operations.len(), "executing batch");
        let response = match tokio::spawn(async move { executor.execute(operations).await }).await
        {
            Ok(response) => response,
            Err(e) => {
                error!(operation = %kind, error = %e, "executor failed, dropping batch");
                ExecutionResponse::new(ExecutionResult::FailNoRetry)
            }
        };

        let delay = self.apply_response(batch, response);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "delaying next execution");
            tokio::time::sleep(delay).await;
        }
    }

    /// Applies an executor response and returns the pause before the next pass.
    fn apply_response(
        &self,
        batch: Vec<QueueItem<O>>,
        response: ExecutionResponse<O>,
    ) -> Duration {
        let mut resolved = Vec::new();
        let mut settle = |item: QueueItem<O>, success: bool| {
            if let Some(waiter) = item.waiter {
                resolved.push((waiter, success));
            }
        };
        let mut highest_retries = 0;

        let mut state = self.state.lock();
        state.in_flight.clear();
        let mut items = batch.into_iter();
        let kind = response.result;

        match kind {
            ExecutionResult::Success => {
                items.for_each(|item| settle(item, true));
            }
            ExecutionResult::SuccessStartingOnly => {
                if let Some(head) = items.next() {
                    settle(head, true);
                }
                state.requeue_front(items.collect());
            }
            ExecutionResult::FailRetry => {
                let retried: Vec<_> = items
                    .map(|mut item| {
                        item.retries += 1;
                        highest_retries = highest_retries.max(item.retries);
                        item
                    })
                    .collect();
                warn!(count = retried.len(), retries = highest_retries, "batch will be retried");
                state.requeue_front(retried);
            }
            ExecutionResult::FailUnauthorized => {
                warn!("unauthorized, pausing operation repository");
                state.requeue_front(items.collect());
                state.paused = true;
            }
            ExecutionResult::FailNoRetry => {
                error!(count = items.len(), "batch failed without retry, dropping");
                items.for_each(|item| settle(item, false));
            }
            ExecutionResult::FailConflict | ExecutionResult::FailInvalidLogin => {
                if let Some(head) = items.next() {
                    warn!(operation = %head.operation.kind(), result = ?kind, "dropping starting operation");
                    settle(head, false);
                }
                state.requeue_front(items.collect());
            }
        }

        if let Some(translations) = &response.id_translations {
            for item in state.queue.iter_mut() {
                item.operation.translate_ids(translations);
            }
            for id in translations.values() {
                self.new_records.add(id);
            }
            debug!(count = translations.len(), "applied id translations");
        }

        if let Some(operations) = response.operations {
            let follow_ups = operations
                .into_iter()
                .map(|operation| QueueItem::new(operation, None, 0))
                .collect();
            state.requeue_front(follow_ups);
        }

        self.persist(&state);
        drop(state);

        for (waiter, success) in resolved {
            let _ = waiter.send(success);
        }

        self.config
            .delay_before_next_execution(highest_retries, response.retry_after_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::OperationExecutor;
    use crate::operation::GroupComparisonType;
    use opsync_storage::InMemoryBackend;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum Kind {
        Work,
        Orphan,
    }

    impl fmt::Display for Kind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Op {
        kind: Kind,
        record: String,
        key: String,
    }

    fn op(record: &str, key: &str) -> Op {
        Op {
            kind: Kind::Work,
            record: record.into(),
            key: key.into(),
        }
    }

    impl Operation for Op {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.kind
        }
        fn apply_to_record_id(&self) -> &str {
            &self.record
        }
        fn create_comparison_key(&self) -> String {
            self.key.clone()
        }
        fn modify_comparison_key(&self) -> String {
            self.key.clone()
        }
        fn group_comparison_type(&self) -> GroupComparisonType {
            GroupComparisonType::Alter
        }
        fn can_start_execute(&self) -> bool {
            !crate::id::is_local_id(&self.record)
        }
        fn translate_ids(&mut self, translations: &HashMap<String, String>) {
            if let Some(id) = translations.get(&self.record) {
                self.record = id.clone();
            }
        }
    }

    struct Scripted {
        results: Mutex<Vec<ExecutionResult>>,
        calls: Mutex<Vec<Vec<Op>>>,
    }

    impl Scripted {
        fn new(results: Vec<ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OperationExecutor<Op> for Scripted {
        fn operations(&self) -> Vec<Kind> {
            vec![Kind::Work]
        }

        async fn execute(&self, operations: Vec<Op>) -> ExecutionResponse<Op> {
            self.calls.lock().push(operations);
            let mut results = self.results.lock();
            let result = if results.is_empty() {
                ExecutionResult::Success
            } else {
                results.remove(0)
            };
            ExecutionResponse::new(result)
        }
    }

    fn config() -> OperationRepoConfig {
        OperationRepoConfig::default()
            .with_execution_interval(Duration::from_millis(100))
            .with_post_wake_delay(Duration::from_millis(10))
            .with_default_fail_retry_backoff(Duration::from_secs(1))
    }

    fn repo_with(executor: Arc<Scripted>, storage: Option<Arc<dyn StorageBackend>>) -> OperationRepo<Op> {
        let mut registry: ExecutorRegistry<Op> = ExecutorRegistry::new();
        registry.register(executor).unwrap();
        OperationRepo::new(config(), registry, storage, Arc::new(NewRecordsState::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn grouped_batch_succeeds() {
        let executor = Scripted::new(vec![]);
        let repo = repo_with(Arc::clone(&executor), None);
        repo.start();
        repo.await_initialized().await;

        repo.enqueue(op("r", "A"), false);
        repo.enqueue(op("r", "B"), false);
        assert!(repo.enqueue_and_wait(op("r", "A"), true).await);

        let calls = executor.calls.lock();
        assert_eq!(calls[0].len(), 2);
        assert!(calls[0].iter().all(|o| o.key == "A"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_resolves_false() {
        let executor = Scripted::new(vec![ExecutionResult::FailNoRetry]);
        let repo = repo_with(executor, None);
        repo.start();

        assert!(!repo.enqueue_and_wait(op("r", "A"), true).await);
        assert!(repo.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_requeues_then_succeeds() {
        let executor = Scripted::new(vec![ExecutionResult::FailRetry]);
        let repo = repo_with(Arc::clone(&executor), None);
        repo.start();

        assert!(repo.enqueue_and_wait(op("r", "A"), true).await);
        assert_eq!(executor.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_executor_drops_batch() {
        let executor = Scripted::new(vec![]);
        let repo = repo_with(executor, None);
        repo.start();

        let orphan = Op {
            kind: Kind::Orphan,
            record: "r".into(),
            key: "A".into(),
        };
        assert!(!repo.enqueue_and_wait(orphan, true).await);
        assert!(!repo.contains_instance_of(Kind::Orphan));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_pauses_until_resumed() {
        let executor = Scripted::new(vec![ExecutionResult::FailUnauthorized]);
        let repo = Arc::new(repo_with(Arc::clone(&executor), None));
        repo.start();

        let waiting = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { repo.enqueue_and_wait(op("r", "A"), true).await })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(repo.is_paused());
        assert_eq!(executor.calls.lock().len(), 1);
        assert!(repo.contains_instance_of(Kind::Work));

        repo.resume_after_authorization();
        assert!(waiting.await.unwrap());
        assert!(!repo.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_persists_after_initialization() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let executor = Scripted::new(vec![]);
        let repo = repo_with(executor, Some(Arc::clone(&storage)));
        repo.start();
        repo.await_initialized().await;

        repo.enqueue(op("r", "A"), false);
        let saved = load_persisted_operations::<Op>(storage.as_ref(), OPERATIONS_STORE_KEY).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].operation, op("r", "A"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resolves_pending_waiters() {
        let executor = Scripted::new(vec![]);
        let repo = Arc::new(repo_with(Arc::clone(&executor), None));
        repo.start();
        repo.await_initialized().await;

        let waiting = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { repo.enqueue_and_wait(op("local-r", "A"), true).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(repo.len(), 1);

        repo.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiter left hanging after stop")
            .unwrap();
        assert!(!outcome);
        assert!(executor.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_after_stop_resolves_false_and_persists() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let executor = Scripted::new(vec![]);
        let repo = repo_with(Arc::clone(&executor), Some(Arc::clone(&storage)));
        repo.start();
        repo.await_initialized().await;
        repo.stop();

        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            repo.enqueue_and_wait(op("r1", "A"), true),
        )
        .await;
        assert_eq!(outcome, Ok(false));
        assert!(executor.calls.lock().is_empty());

        let saved = load_persisted_operations::<Op>(storage.as_ref(), OPERATIONS_STORE_KEY).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].operation, op("r1", "A"));
    }
}
