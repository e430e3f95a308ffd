//! Records recently created by the backend.

use crate::config::OperationRepoConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks backend ids that were just created.
///
/// Backends are eventually consistent: a record created a moment ago may
/// not be visible to the next request yet. Operations targeting such a
/// record are held back for `post_create_delay`, and "missing" answers
/// about it are retried for `post_create_retry_up_to`.
#[derive(Debug)]
pub struct NewRecordsState {
    records: Mutex<HashMap<String, Instant>>,
    post_create_delay: Duration,
    post_create_retry_up_to: Duration,
}

impl NewRecordsState {
    /// Creates an empty state with explicit windows.
    pub fn new(post_create_delay: Duration, post_create_retry_up_to: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            post_create_delay,
            post_create_retry_up_to,
        }
    }

    /// Creates an empty state using the repository timings.
    pub fn from_config(config: &OperationRepoConfig) -> Self {
        Self::new(config.post_create_delay, config.post_create_retry_up_to)
    }

    /// Marks `id` as created now.
    pub fn add(&self, id: &str) {
        self.records.lock().insert(id.to_string(), Instant::now());
    }

    /// Returns true if operations may target `id`.
    pub fn can_access(&self, id: &str) -> bool {
        match self.records.lock().get(id) {
            Some(created) => created.elapsed() >= self.post_create_delay,
            None => true,
        }
    }

    /// Returns true if a "missing" answer about `id` should be retried.
    pub fn is_in_missing_retry_window(&self, id: &str) -> bool {
        match self.records.lock().get(id) {
            Some(created) => created.elapsed() <= self.post_create_retry_up_to,
            None => false,
        }
    }
}

impl Default for NewRecordsState {
    fn default() -> Self {
        Self::from_config(&OperationRepoConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fresh_record_is_blocked_then_released() {
        let state = NewRecordsState::new(Duration::from_secs(5), Duration::from_secs(60));
        assert!(state.can_access("R1"));

        state.add("R1");
        assert!(!state.can_access("R1"));
        assert!(state.can_access("R2"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(state.can_access("R1"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_retry_window_expires() {
        let state = NewRecordsState::new(Duration::from_secs(5), Duration::from_secs(60));
        assert!(!state.is_in_missing_retry_window("R1"));

        state.add("R1");
        assert!(state.is_in_missing_retry_window("R1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!state.is_in_missing_retry_window("R1"));
    }
}
