//! Retry policy
//!
//! Reusable retry loop parameterized per call site by attempt count, backoff
//! function and a retryable-error predicate.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result with the number of attempts used
//! 3. If the error is not retryable, return it immediately
//! 4. If attempts remain, sleep for `backoff.delay_after(attempt)` and retry
//! 5. Otherwise return the last error
//!
//! No delay follows the final attempt.

use std::future::Future;
use std::time::Duration;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// `attempt × base` after the Nth failed attempt (1-based)
    Linear(Duration),
    /// Doubling delay starting at `initial`, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(base) => base.saturating_mul(attempt),
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Successful outcome of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Final failure of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

/// Attempt count plus backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Linear policy: delay after attempt N is N × `base`
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Linear(base),
        }
    }

    /// Run `operation` under this policy
    ///
    /// # Arguments
    /// * `operation_name` - Name for logging (e.g., "store audit")
    /// * `is_retryable` - Errors for which another attempt makes sense
    /// * `operation` - Async closure producing a fresh future per attempt
    pub async fn run<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        mut operation: F,
    ) -> Result<Attempted<T>, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = operation_name,
                            attempt,
                            "Operation recovered after retry"
                        );
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    if !is_retryable(&error) {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            error = %error,
                            "Operation failed with non-retryable error"
                        );
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                        });
                    }

                    if attempt >= max_attempts {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "Operation failed: retry attempts exhausted"
                        );
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                        });
                    }

                    let delay = self.backoff.delay_after(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, will retry after backoff"
                    );

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
