//! Bounded retries with exponential backoff for transient failures.
//!
//! Source files are often read while a network share or sync client is still writing
//! them. Such reads fail with I/O errors that usually go away after a short wait, so
//! readers are wrapped in [`retry`] with a [`RetryPolicy`].

use std::future::Future;
use std::time::Duration;

use etl_config::shared::RetryConfig;
use tracing::warn;

use crate::error::EtlResult;

/// Attempt budget and deterministic backoff schedule of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A policy that runs the operation once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Returns the delay after failed attempt number `attempt` (1-indexed).
    ///
    /// delay = initial_delay * multiplier^(attempt - 1), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        let delay_ms = self.initial_delay.as_millis() as f64 * multiplier;

        let capped_delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

/// Waits between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `operation` until it succeeds, fails with a non retryable error or the attempt
/// budget of `policy` is spent.
///
/// The operation receives the attempt number, starting at 1. The last error is returned
/// when all attempts fail.
pub async fn retry<S, F, Fut, T>(policy: &RetryPolicy, sleeper: &S, mut operation: F) -> EtlResult<T>
where
    S: Sleeper,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EtlResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && err.is_retryable() => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );

                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
