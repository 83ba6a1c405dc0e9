//! Retry logic with exponential backoff
//!
//! Wraps one fallible async operation and re-invokes it with growing delays
//! until it succeeds, its error is classified as terminal, or the configured
//! attempt/time budget runs out. Backoff sleeps never touch the rate limiter;
//! an operation that makes an outbound call acquires its own permit on every
//! invocation.
//!
//! # Example
//!
//! ```no_run
//! use comment_dl::retry::RetryingFetcher;
//! use comment_dl::config::RetryConfig;
//! use comment_dl::error::Error;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! let fetcher = RetryingFetcher::new(RetryConfig::default());
//! let cancel = CancellationToken::new();
//! let body = fetcher
//!     .execute(&cancel, || async {
//!         // Your operation here
//!         Ok::<_, Error>("comments".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Cancelled, Error};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again after this error
    fn is_retryable(&self) -> bool;
}

/// Every failure is retried the same way except cancellation, which ends the
/// retry loop at once.
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }
}

/// Bounded exponential-backoff retry around one operation
///
/// Stateless across invocations: all attempt counters and delays live inside
/// a single [`execute`](Self::execute) call.
#[derive(Clone, Debug, Default)]
pub struct RetryingFetcher {
    config: RetryConfig,
}

impl RetryingFetcher {
    /// Create a fetcher with the given policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The retry policy in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or the retry budget is spent
    ///
    /// Returns the success value, or the last error once
    /// `max_attempts` retries are used up or the next delay would overrun
    /// `max_elapsed`. If `cancel` fires during a backoff sleep the call
    /// returns `E::from(Cancelled)` without another attempt.
    pub async fn execute<F, Fut, T, E>(&self, cancel: &CancellationToken, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: IsRetryable + From<Cancelled> + std::fmt::Display,
    {
        self.execute_observed(cancel, operation, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(error, attempt, delay)`
    /// before each backoff sleep
    pub async fn execute_observed<F, Fut, T, E, R>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: IsRetryable + From<Cancelled> + std::fmt::Display,
        R: FnMut(&E, u32, Duration),
    {
        let config = &self.config;
        let started = Instant::now();
        let mut attempt = 0;
        let mut delay = config.initial_delay;

        loop {
            let error = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::debug!(error = %error, "Operation failed with non-retryable error");
                return Err(error);
            }

            if attempt >= config.max_attempts {
                tracing::error!(
                    error = %error,
                    attempts = attempt + 1,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(error);
            }

            let jittered_delay = if config.jitter {
                add_jitter(delay)
            } else {
                delay
            };

            if let Some(max_elapsed) = config.max_elapsed
                && started.elapsed() + jittered_delay > max_elapsed
            {
                tracing::error!(
                    error = %error,
                    attempts = attempt + 1,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Operation failed, retry time budget exhausted"
                );
                return Err(error);
            }

            attempt += 1;

            tracing::warn!(
                error = %error,
                attempt = attempt,
                max_attempts = config.max_attempts,
                delay_ms = jittered_delay.as_millis(),
                "Operation failed, retrying"
            );
            on_retry(&error, attempt, jittered_delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(attempt, "Cancelled during backoff");
                    return Err(E::from(Cancelled));
                }
                _ = tokio::time::sleep(jittered_delay) => {}
            }

            delay = next_delay(delay, config);
        }
    }
}

/// Execute `operation` with the given retry policy
///
/// Shorthand for `RetryingFetcher::new(config.clone()).execute(cancel, operation)`.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + From<Cancelled> + std::fmt::Display,
{
    RetryingFetcher::new(config.clone())
        .execute(cancel, operation)
        .await
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
///
/// Products too large (or not finite) for a `Duration` saturate to `max_delay`.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The jittered delay is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
