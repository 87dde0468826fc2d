//! Retry helpers for startup checks and the consumer loop.
//!
//! Jobs are never retried; these helpers only cover talking to the broker
//! and the store while the worker comes up or while it polls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each following one.
    pub base_delay: Duration,
    /// Upper bound of a single delay.
    pub max_delay: Duration,
    /// Name used in log lines.
    pub operation_name: String,
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            operation_name: operation_name.into(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retries are used up, returning
/// the last error in that case.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!("{} succeeded after {} retries", config.operation_name, retry);
                }
                return Ok(value);
            }
            Err(e) if retry < config.max_retries => {
                retry += 1;
                let delay = config.delay_before(retry);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    config.operation_name,
                    retry,
                    config.max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decides whether a repeated failure of a polling loop is still worth a log line.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > self.max_logged_failures {
            warn!(
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures == self.max_logged_failures + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
        }
        self.consecutive_failures <= self.max_logged_failures
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new("startup check").with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_before(1), Duration::from_millis(100));
        assert_eq!(config.delay_before(2), Duration::from_millis(200));
        assert_eq!(config.delay_before(3), Duration::from_millis(400));
        assert_eq!(config.delay_before(20), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_suppresses_then_resets() {
        let mut tracker = FailureTracker::new(2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert_eq!(tracker.failure_count(), 4);

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_retry_async_eventual_success() {
        let config = RetryConfig::new("startup check").with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection refused")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_gives_up() {
        let config = RetryConfig::new("startup check")
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(2);
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = retry_async(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("unreachable") }
        })
        .await;

        assert_eq!(result, Err("unreachable"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
