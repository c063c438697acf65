//! Configuration for the queue manager and its worker pool.

use std::time::Duration;

use crate::config::ConfigError;

/// Default number of worker tasks.
pub const DEFAULT_WORKER_COUNT: usize = 10;
/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default time `submit_and_wait` waits for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time shutdown waits for workers to drain the queue.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on a single worker poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Queue and pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of worker tasks to spawn.
    pub worker_count: usize,
    /// Maximum number of queued (not yet dequeued) requests.
    pub queue_capacity: usize,
    /// How long `submit_and_wait` waits before giving up.
    pub request_timeout: Duration,
    /// How long shutdown waits for workers before aborting them.
    pub shutdown_timeout: Duration,
    /// How long a worker waits on an empty queue before re-checking state.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();

        assert_eq!(config.worker_count, 10);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_config_builder() {
        let config = QueueConfig::new(4)
            .with_queue_capacity(8)
            .with_request_timeout(Duration::from_secs(5))
            .with_shutdown_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(50));

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_queue_config_rejects_zero_values() {
        assert!(QueueConfig::new(0).validate().is_err());
        assert!(QueueConfig::new(1).with_queue_capacity(0).validate().is_err());
        assert!(QueueConfig::new(1)
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());

        let err = QueueConfig::new(1)
            .with_shutdown_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("shutdown_timeout"));
    }
}
