//! Startup checks for known bad persisted states.

use crate::listener::OperationQueue;
use crate::operation::Operation;
use crate::repo::OperationRepo;
use std::sync::Arc;
use tracing::{debug, warn};

/// A detectable bad state and how to get out of it.
///
/// Checks run once, after the persisted queue has been loaded, so they can
/// inspect what is already pending.
pub trait RecoveryCheck<O: Operation>: Send + Sync {
    /// Short identifier used in logs and reports.
    fn name(&self) -> &str;

    /// Returns true if the local state needs recovery.
    fn is_in_bad_state(&self, queue: &dyn OperationQueue<O>) -> bool;

    /// Repairs the state, usually by enqueueing the missing operation.
    fn recover(&self, queue: &dyn OperationQueue<O>);

    /// Message logged when the bad state is detected.
    fn message(&self) -> String;
}

/// Which checks fired during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of checks evaluated.
    pub evaluated: usize,
    /// Names of the checks that detected a bad state and recovered.
    pub recovered: Vec<String>,
}

impl RecoveryReport {
    /// Returns true if no check fired.
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty()
    }
}

/// Runs every registered [`RecoveryCheck`] once.
pub struct RecoveryRunner<O: Operation> {
    checks: Vec<Arc<dyn RecoveryCheck<O>>>,
}

impl<O: Operation> RecoveryRunner<O> {
    /// Creates a runner without checks.
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Adds a check. Checks run in registration order.
    pub fn register(&mut self, check: Arc<dyn RecoveryCheck<O>>) {
        self.checks.push(check);
    }

    /// Builder form of [`RecoveryRunner::register`].
    pub fn with(mut self, check: Arc<dyn RecoveryCheck<O>>) -> Self {
        self.register(check);
        self
    }

    /// Waits for `repo` to load its queue, then evaluates every check.
    pub async fn run(&self, repo: &OperationRepo<O>) -> RecoveryReport {
        repo.await_initialized().await;
        self.run_now(repo)
    }

    /// Evaluates every check against `queue` immediately.
    pub fn run_now(&self, queue: &dyn OperationQueue<O>) -> RecoveryReport {
        let mut report = RecoveryReport {
            evaluated: self.checks.len(),
            recovered: Vec::new(),
        };
        for check in &self.checks {
            if check.is_in_bad_state(queue) {
                warn!(check = check.name(), "{}", check.message());
                check.recover(queue);
                report.recovered.push(check.name().to_string());
            } else {
                debug!(check = check.name(), "recovery check passed");
            }
        }
        report
    }
}

impl<O: Operation> Default for RecoveryRunner<O> {
    fn default() -> Self {
        Self::new()
    }
}
