//! Retry with exponential backoff and jitter.

use crate::defaults;
use crate::error::{Result, VoxflowError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try and how long to wait between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(defaults::RETRY_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RETRY_MAX_DELAY_MS),
            exponential_base: defaults::RETRY_EXPONENTIAL_BASE,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
        jitter: bool,
    ) -> Result<Self> {
        if max_attempts < 1 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if max_delay < initial_delay {
            return Err(invalid(
                "retry.max_delay_ms",
                "must not be less than retry.initial_delay_ms",
            ));
        }
        if exponential_base.is_nan() || exponential_base <= 1.0 || exponential_base.is_infinite() {
            return Err(invalid(
                "retry.exponential_base",
                "must be a finite number greater than 1",
            ));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            exponential_base,
            jitter,
        })
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Backoff before the retry that follows failed attempt `attempt_index`
    /// (0-based): `min(max_delay, initial_delay * base^attempt_index)`, then
    /// scaled by a uniform factor in [0.75, 1.25] when jitter is on.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let exponent = attempt_index.min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter {
            capped * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped
        };
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Runs async operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry logic
    ///
    /// Non-retryable failures return immediately. When every attempt fails,
    /// the last failure is returned as is.
    pub async fn execute<F, Fut, T, E, R>(
        &self,
        operation: F,
        is_retryable: R,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        self.execute_with_callback(operation, is_retryable, |_: &E, _: u32| {})
            .await
    }

    /// Like [`execute`](Self::execute), calling `on_retry` with each retried
    /// failure and the 1-based number of the attempt that produced it.
    pub async fn execute_with_callback<F, Fut, T, E, R, C>(
        &self,
        mut operation: F,
        is_retryable: R,
        mut on_retry: C,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
        C: FnMut(&E, u32),
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) if !is_retryable(&e) => {
                    debug!(attempt, error = %e, "operation failed with non-retryable error");
                    return Err(e);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "operation failed, retrying"
                    );
                    on_retry(&e, attempt);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempts = attempt, error = %e, "operation failed after all attempts");
                    return Err(e);
                }
            }
        }
    }
}

fn invalid(key: &str, message: &str) -> VoxflowError {
    VoxflowError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
