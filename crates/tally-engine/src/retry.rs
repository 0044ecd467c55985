//! Bounded retry with exponential backoff.
//!
//! Wraps a storage call and retries it on transient failures only, per
//! [`LedgerError::is_transient`]. Domain errors propagate immediately
//! without consuming an attempt. The executor does not deduplicate:
//! deduplication across logical calls is the idempotency cache's job, and
//! each attempt must be atomic from the storage collaborator's point of
//! view.

use std::future::Future;
use std::time::Duration;

use tally_core::{LedgerError, Result, RetryConfig};

/// Executes storage operations under the configured retry policy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor over a retry policy.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The delay slept before attempt `attempt` (1-based, so `attempt >= 2`):
    /// `min(max_delay, initial_delay * multiplier^(attempt - 2))`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2);
        let factor = self
            .config
            .backoff_multiplier
            .powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let millis = (self.config.initial_delay_ms as f64 * factor)
            .min(self.config.max_delay_ms as f64)
            .max(0.0);
        Duration::from_millis(millis as u64)
    }

    /// Run `op`, retrying transient failures up to the configured attempt
    /// budget.
    ///
    /// When retries are disabled or `max_attempts <= 1`, the operation
    /// runs exactly once and any failure propagates immediately.
    ///
    /// # Errors
    ///
    /// Returns the operation's error: immediately for non-transient
    /// failures, or the last transient failure once attempts are
    /// exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled || self.config.max_attempts <= 1 {
            return op().await;
        }

        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tally_core::UserId;

    fn config(enabled: bool, max_attempts: u32) -> RetryConfig {
        RetryConfig {
            enabled,
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let executor = RetryExecutor::new(config(true, 3));
        let calls = AtomicU32::new(0);

        let result = executor
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(LedgerError::Storage("flaky".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_propagate_the_last_failure() {
        let executor = RetryExecutor::new(config(true, 3));
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Storage("still down".into()))
            })
            .await;

        assert_eq!(result, Err(LedgerError::Storage("still down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn domain_errors_bypass_retry_entirely() {
        let executor = RetryExecutor::new(config(true, 5));
        let calls = AtomicU32::new(0);
        let user_id = UserId::generate();

        let result: Result<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::InsufficientCredits {
                    user_id,
                    required: 100,
                    available: 5,
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientCredits { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_policy_runs_exactly_once() {
        let executor = RetryExecutor::new(config(false, 5));
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Storage("down".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_attempt_budget_runs_exactly_once() {
        let executor = RetryExecutor::new(config(true, 1));
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Storage("down".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_schedule_grows_and_caps() {
        let executor = RetryExecutor::new(RetryConfig {
            enabled: true,
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            backoff_multiplier: 2.0,
        });

        assert_eq!(executor.delay_before(2), Duration::from_millis(100));
        assert_eq!(executor.delay_before(3), Duration::from_millis(200));
        assert_eq!(executor.delay_before(4), Duration::from_millis(400));
        // Capped by max_delay from here on.
        assert_eq!(executor.delay_before(5), Duration::from_millis(500));
        assert_eq!(executor.delay_before(9), Duration::from_millis(500));
    }
}
