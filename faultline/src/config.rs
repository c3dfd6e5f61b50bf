//! Configuration for the verifier and the completeness checker.

use std::time::Duration;

/// Retry schedule for transient store call failures.
///
/// Backoff starts at `initial_backoff` and doubles after every failed
/// attempt, capped at `max_backoff`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retry.
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given parameters.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(31);
        let delay = self.initial_backoff.saturating_mul(1u32 << shift);
        std::cmp::min(delay, self.max_backoff)
    }
}

/// Configuration for [`HashVerifier`](crate::HashVerifier).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Retry schedule for each query
    pub retry: RetryPolicy,
}

impl VerifierConfig {
    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for the watch completeness checker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckerConfig {
    /// Capacity of each worker's target queue. A full queue blocks the
    /// distributor.
    pub queue_capacity: usize,

    /// Key prefix to watch. Empty watches the whole keyspace.
    pub key_prefix: String,

    /// Ask for previous values on events
    pub with_prev_kv: bool,

    /// Ask for progress notifications
    pub with_progress_notify: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            key_prefix: String::new(),
            with_prev_kv: true,
            with_progress_notify: false,
        }
    }
}

impl CheckerConfig {
    /// Set the per-worker queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Watch only keys under `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Toggle previous values on events.
    pub fn with_prev_kv(mut self, enabled: bool) -> Self {
        self.with_prev_kv = enabled;
        self
    }

    /// Toggle progress notifications.
    pub fn with_progress_notify(mut self, enabled: bool) -> Self {
        self.with_progress_notify = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(50), Duration::from_millis(300));
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(300));
        assert_eq!(policy.backoff(60), Duration::from_millis(300));
    }

    #[test]
    fn test_checker_defaults() {
        let config = CheckerConfig::default();
        assert_eq!(config.queue_capacity, 100);
        assert!(config.key_prefix.is_empty());
        assert!(config.with_prev_kv);
        assert!(!config.with_progress_notify);

        let config = config.with_queue_capacity(1).with_key_prefix("/registry/");
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.key_prefix, "/registry/");
    }
}
