use std::time::Duration;

use super::generator::FailurePolicy;

/// Configuration for the request lifecycle: key generation cost, failure
/// injection, background concurrency, and terminal-status retry policy.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Simulated work per generated key, in milliseconds.
    pub per_key_delay_ms: u64,
    /// Fault injection applied once per key batch.
    pub failure_policy: FailurePolicy,
    /// Maximum number of requests processed at the same time. Further
    /// submissions queue inside the task pool. 0 = unbounded.
    pub max_concurrent_tasks: usize,
    /// Attempts for writing a terminal status before the request is
    /// reported as stuck. Values below 1 are treated as 1.
    pub status_write_attempts: u32,
    /// Pause between terminal-status write attempts, in milliseconds.
    pub status_retry_backoff_ms: u64,
    /// Upper bound on keys per request, enforced at the HTTP edge.
    pub max_keys_per_request: u32,
}

impl ServiceConfig {
    #[must_use]
    pub fn per_key_delay(&self) -> Duration {
        Duration::from_millis(self.per_key_delay_ms)
    }

    #[must_use]
    pub fn status_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.status_retry_backoff_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            per_key_delay_ms: 20,
            failure_policy: FailurePolicy::Rate {
                rate: 0.05,
                seed: None,
            },
            max_concurrent_tasks: 256,
            status_write_attempts: 3,
            status_retry_backoff_ms: 50,
            max_keys_per_request: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.per_key_delay(), Duration::from_millis(20));
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Rate {
                rate: 0.05,
                seed: None
            }
        );
        assert_eq!(config.max_concurrent_tasks, 256);
        assert_eq!(config.status_write_attempts, 3);
        assert_eq!(config.status_retry_backoff(), Duration::from_millis(50));
        assert_eq!(config.max_keys_per_request, 1000);
    }
}
