//! Executors and their registry.

use crate::error::{SyncError, SyncResult};
use crate::operation::Operation;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of executing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Every operation in the batch is done.
    Success,
    /// Only the starting operation is done; the rest go back to the queue.
    SuccessStartingOnly,
    /// Transient failure; the batch is retried with backoff.
    FailRetry,
    /// Permanent failure; the batch is dropped.
    FailNoRetry,
    /// Credentials were rejected; the queue pauses until re-authorized.
    FailUnauthorized,
    /// The starting operation conflicts with backend state and is dropped.
    FailConflict,
    /// The login in the starting operation was rejected and is dropped.
    FailInvalidLogin,
}

impl ExecutionResult {
    /// Returns true for the two success outcomes.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExecutionResult::Success | ExecutionResult::SuccessStartingOnly
        )
    }
}

/// Result of one executor call.
#[derive(Debug, Clone)]
pub struct ExecutionResponse<O> {
    /// The outcome.
    pub result: ExecutionResult,
    /// Local ids the backend replaced, local id to backend id.
    pub id_translations: Option<HashMap<String, String>>,
    /// Follow-up operations, run before anything already queued.
    pub operations: Option<Vec<O>>,
    /// Backend-requested minimum wait before the next attempt.
    pub retry_after_seconds: Option<u64>,
}

impl<O> ExecutionResponse<O> {
    /// Creates a response with only an outcome.
    pub fn new(result: ExecutionResult) -> Self {
        Self {
            result,
            id_translations: None,
            operations: None,
            retry_after_seconds: None,
        }
    }

    /// Shorthand for a plain [`ExecutionResult::Success`].
    pub fn success() -> Self {
        Self::new(ExecutionResult::Success)
    }

    /// Attaches id translations.
    pub fn with_id_translations(mut self, translations: HashMap<String, String>) -> Self {
        self.id_translations = Some(translations);
        self
    }

    /// Attaches follow-up operations.
    pub fn with_operations(mut self, operations: Vec<O>) -> Self {
        self.operations = Some(operations);
        self
    }

    /// Attaches a retry-after hint.
    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after_seconds = seconds;
        self
    }
}

/// Performs the backend call for a batch of operations.
///
/// A batch always contains operations of a single group, headed by the
/// operation the repository picked to start. Executors report every
/// failure through [`ExecutionResult`] instead of returning errors.
#[async_trait]
pub trait OperationExecutor<O: Operation>: Send + Sync {
    /// Operation kinds this executor handles.
    fn operations(&self) -> Vec<O::Kind>;

    /// Executes a non-empty batch.
    async fn execute(&self, operations: Vec<O>) -> ExecutionResponse<O>;
}

/// Maps every operation kind to exactly one executor.
pub struct ExecutorRegistry<O: Operation> {
    executors: HashMap<O::Kind, Arc<dyn OperationExecutor<O>>>,
}

impl<O: Operation> ExecutorRegistry<O> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registers an executor for every kind it declares.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateExecutor`] if a declared kind already
    /// has an executor; the registry is left unchanged in that case.
    pub fn register(&mut self, executor: Arc<dyn OperationExecutor<O>>) -> SyncResult<()> {
        let kinds = executor.operations();
        if let Some(taken) = kinds.iter().find(|k| self.executors.contains_key(*k)) {
            return Err(SyncError::DuplicateExecutor {
                kind: taken.to_string(),
            });
        }
        for kind in kinds {
            self.executors.insert(kind, Arc::clone(&executor));
        }
        Ok(())
    }

    /// Builder form of [`ExecutorRegistry::register`].
    ///
    /// # Errors
    ///
    /// Same as [`ExecutorRegistry::register`].
    pub fn with(mut self, executor: Arc<dyn OperationExecutor<O>>) -> SyncResult<Self> {
        self.register(executor)?;
        Ok(self)
    }

    /// Returns the executor for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingExecutor`] if no executor handles it.
    pub fn resolve(&self, kind: O::Kind) -> SyncResult<Arc<dyn OperationExecutor<O>>> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| SyncError::MissingExecutor {
                kind: kind.to_string(),
            })
    }

    /// Returns the number of registered kinds.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl<O: Operation> Default for ExecutorRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}
