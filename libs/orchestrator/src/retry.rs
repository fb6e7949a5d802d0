//! Bounded retry for transient provider failures.

use std::future::Future;
use std::time::Duration;

use stratus_reconcile::ProviderError;
use tokio::time::Instant;
use tracing::debug;

/// Default delay before the single retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default retry limit per call.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Retry policy applied by the orchestrator around Cloud API calls.
///
/// Only transient failures (timeout, rate limit) are retried, at most
/// `max_retries` times, after a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Whether a failure on attempt number `attempt` (1-based) should be retried.
    pub fn should_retry(&self, attempt: u32, err: &ProviderError) -> bool {
        err.is_transient() && attempt <= self.max_retries
    }

    /// Run `op`, retrying per policy.
    ///
    /// A retry that would start after `deadline` is not attempted. Returns
    /// the final result and the number of attempts made.
    pub async fn run<T, F, Fut>(
        &self,
        deadline: Option<Instant>,
        mut op: F,
    ) -> (Result<T, ProviderError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            let result = op().await;
            let err = match result {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };

            if !self.should_retry(attempt, &err) {
                return (Err(err), attempt);
            }
            if deadline.is_some_and(|d| Instant::now() + self.delay > d) {
                debug!(error = %err, "Retry would pass the run deadline, giving up");
                return (Err(err), attempt);
            }

            debug!(
                error = %err,
                attempt,
                delay_ms = self.delay.as_millis() as u64,
                "Transient failure, retrying"
            );
            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}
