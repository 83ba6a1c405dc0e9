//! Request rate limiting using a token bucket
//!
//! The RateLimiter is the single gate every outbound comment-listing call
//! passes through. One instance is built per run and cloned into each fetch
//! task, so all tasks draw from the same bucket.

use crate::config::RateLimitConfig;
use crate::error::Cancelled;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared token bucket rate limiter
///
/// # Algorithm
///
/// - Each token authorizes exactly one outbound request attempt
/// - The bucket starts full and holds at most `capacity` tokens
/// - One token is added every `interval`, measured from the last refill
/// - Tasks that find the bucket empty sleep until the next token is due
///
/// # Implementation
///
/// The token count and refill clock live together behind one mutex so a
/// refill-then-take is a single critical section. The lock is never held
/// across an `.await`. Cloning is cheap and every clone shares the bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    capacity: u32,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    /// Credit whole intervals elapsed since `last_refill`, capped at `capacity`
    fn refill(&mut self, capacity: u32, interval: Duration, now: Instant) {
        if self.tokens >= capacity {
            // A full bucket does not bank time toward future tokens
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / interval.as_nanos().max(1);
        if intervals == 0 {
            return;
        }

        let added = u32::try_from(intervals).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(added).min(capacity);
        if self.tokens == capacity {
            self.last_refill = now;
        } else {
            // Keep the fractional progress toward the next token
            self.last_refill += interval * added;
        }
    }
}

impl RateLimiter {
    /// Create a limiter holding at most `capacity` tokens and regaining one every `interval`
    ///
    /// A zero capacity is raised to 1 and a zero interval to 1ms; use
    /// [`Config::validate`](crate::Config::validate) to reject those up front.
    ///
    /// # Examples
    ///
    /// ```
    /// use comment_dl::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// // One request per second, no burst
    /// let limiter = RateLimiter::new(1, Duration::from_secs(1));
    /// assert_eq!(limiter.capacity(), 1);
    /// ```
    #[must_use]
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        Self {
            inner: Arc::new(Inner {
                capacity,
                interval,
                bucket: Mutex::new(Bucket {
                    tokens: capacity,
                    last_refill: Instant::now(),
                }),
            }),
        }
    }

    /// Create a limiter from its config section
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.interval)
    }

    /// Bucket capacity
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Time to regain one token
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Tokens available right now (after crediting elapsed time)
    pub fn available(&self) -> u32 {
        let mut bucket = self.lock();
        bucket.refill(self.inner.capacity, self.inner.interval, Instant::now());
        bucket.tokens
    }

    /// Take a token if one is available, without waiting
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Wait for a token
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires before a token is granted,
    /// including when it has already fired on entry. Grant order between
    /// concurrent callers is not FIFO.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use comment_dl::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), comment_dl::error::Cancelled> {
    /// let limiter = RateLimiter::new(1, Duration::from_secs(1));
    /// let cancel = CancellationToken::new();
    ///
    /// // Before each outbound request
    /// limiter.acquire(&cancel).await?;
    /// // ... perform request ...
    /// # Ok(())
    /// # }
    /// ```
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = match self.take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            tracing::trace!(wait_ms = wait.as_millis(), "rate limiter empty, waiting");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Refill and try to take one token; on failure return how long until the next one
    fn take(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self.lock();
        bucket.refill(self.inner.capacity, self.inner.interval, now);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            return Ok(());
        }

        let next = bucket.last_refill + self.inner.interval;
        Err(next
            .saturating_duration_since(now)
            .max(Duration::from_millis(1)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // The critical sections cannot panic, so a poisoned lock still holds a consistent bucket
        self.inner
            .bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
