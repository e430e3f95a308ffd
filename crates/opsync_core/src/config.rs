//! Configuration for the operation repository.

use std::time::Duration;

/// Configuration for the operation repository.
#[derive(Debug, Clone)]
pub struct OperationRepoConfig {
    /// Idle wait between execution passes unless a flush arrives.
    pub execution_interval: Duration,
    /// Pause after each executed batch so follow-up mutations can queue up.
    pub post_wake_delay: Duration,
    /// Backoff added per failed attempt of a batch.
    pub default_fail_retry_backoff: Duration,
    /// How long a freshly created record is off limits to other operations.
    pub post_create_delay: Duration,
    /// How long a "missing" answer about a fresh record is still retryable.
    pub post_create_retry_up_to: Duration,
    /// Maximum number of operations in one executed batch, head included.
    pub max_batch_size: usize,
}

impl OperationRepoConfig {
    /// Creates a configuration with the default timings.
    pub fn new() -> Self {
        Self {
            execution_interval: Duration::from_secs(5),
            post_wake_delay: Duration::from_millis(200),
            default_fail_retry_backoff: Duration::from_secs(15),
            post_create_delay: Duration::from_secs(5),
            post_create_retry_up_to: Duration::from_secs(60),
            max_batch_size: 100,
        }
    }

    /// Sets the execution interval.
    pub fn with_execution_interval(mut self, interval: Duration) -> Self {
        self.execution_interval = interval;
        self
    }

    /// Sets the delay after each executed batch.
    pub fn with_post_wake_delay(mut self, delay: Duration) -> Self {
        self.post_wake_delay = delay;
        self
    }

    /// Sets the per-attempt retry backoff.
    pub fn with_default_fail_retry_backoff(mut self, backoff: Duration) -> Self {
        self.default_fail_retry_backoff = backoff;
        self
    }

    /// Sets the post-create access delay.
    pub fn with_post_create_delay(mut self, delay: Duration) -> Self {
        self.post_create_delay = delay;
        self
    }

    /// Sets the window in which missing fresh records are retried.
    pub fn with_post_create_retry_up_to(mut self, window: Duration) -> Self {
        self.post_create_retry_up_to = window;
        self
    }

    /// Sets the batch size ceiling. Values below 1 are raised to 1.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Calculates the pause before the next pass after a failed batch.
    ///
    /// The larger of `retries * default_fail_retry_backoff` and the
    /// backend's `Retry-After` wins.
    pub fn delay_before_next_execution(
        &self,
        retries: u32,
        retry_after_seconds: Option<u64>,
    ) -> Duration {
        let backoff = self.default_fail_retry_backoff.saturating_mul(retries);
        let retry_after = Duration::from_secs(retry_after_seconds.unwrap_or(0));
        backoff.max(retry_after)
    }
}

impl Default for OperationRepoConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = OperationRepoConfig::new()
            .with_execution_interval(Duration::from_millis(50))
            .with_post_wake_delay(Duration::ZERO)
            .with_max_batch_size(0);

        assert_eq!(config.execution_interval, Duration::from_millis(50));
        assert_eq!(config.post_wake_delay, Duration::ZERO);
        assert_eq!(config.max_batch_size, 1);
        assert_eq!(config.post_create_delay, Duration::from_secs(5));
    }

    #[test]
    fn retry_delay_uses_backoff() {
        let config = OperationRepoConfig::new();

        assert_eq!(config.delay_before_next_execution(0, None), Duration::ZERO);
        assert_eq!(
            config.delay_before_next_execution(2, None),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn retry_delay_honors_retry_after() {
        let config = OperationRepoConfig::new();

        assert_eq!(
            config.delay_before_next_execution(1, Some(60)),
            Duration::from_secs(60)
        );
        // Backoff wins when it is longer than the server hint
        assert_eq!(
            config.delay_before_next_execution(10, Some(60)),
            Duration::from_secs(150)
        );
    }
}
