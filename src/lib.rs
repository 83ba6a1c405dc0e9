//! # comment-dl
//!
//! Concurrent, rate-limited retrieval of video comment threads.
//!
//! ## Design
//!
//! - **One task per video** - every locator gets its own concurrent fetch task
//! - **One shared rate limit** - all tasks draw permits from a single token bucket
//! - **Independent retries** - each task backs off and retries on its own
//! - **Isolated output** - each video appends to its own file; a failing task
//!   never blocks or corrupts another
//!
//! ## Quick Start
//!
//! ```no_run
//! use comment_dl::{ApiKey, Config, FetchOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = FetchOrchestrator::new(Config::default())?;
//!     let api_key = ApiKey::from_env()?;
//!
//!     let report = orchestrator
//!         .run(["https://www.youtube.com/watch?v=dQw4w9WgXcQ"], 50, &api_key)
//!         .await;
//!
//!     for failed in report.failed() {
//!         eprintln!("{}: {:?}", failed.locator, failed.status);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Comment listing API client
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Concurrent fetch orchestration
pub mod orchestrator;
/// Token bucket rate limiting
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Per-video comment files
pub mod sink;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::{CommentPage, CommentSource, PageRequest, YouTubeClient};
pub use config::{ApiConfig, Config, OutputConfig, RateLimitConfig, RetryConfig};
pub use error::{Cancelled, Error, RemoteError, Result};
pub use orchestrator::FetchOrchestrator;
pub use rate_limiter::RateLimiter;
pub use retry::{IsRetryable, RetryingFetcher};
pub use sink::{CommentSink, SinkHandle};
pub use types::{
    ApiKey, CommentRecord, Event, FetchTask, RunReport, TaskOutcome, TaskStatus, VideoId,
};

use tokio_util::sync::CancellationToken;

/// Fire `cancel` when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Spawns a background task and returns immediately.
///
/// # Example
///
/// ```no_run
/// use comment_dl::{Config, FetchOrchestrator, cancel_on_signal};
///
/// # fn example() -> comment_dl::Result<()> {
/// let orchestrator = FetchOrchestrator::new(Config::default())?;
/// cancel_on_signal(orchestrator.cancel_token());
/// # Ok(())
/// # }
/// ```
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => cancel.cancel(),
            _ = cancel.cancelled() => {}
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let register = |kind: SignalKind, name: &'static str| {
        signal(kind)
            .inspect_err(|e| tracing::warn!(error = %e, "Could not register {name} handler"))
            .ok()
    };
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
        tokio::signal::ctrl_c().await.ok();
        return;
    }

    // An unregistered signal never fires
    async fn recv(signal: &mut Option<Signal>) {
        match signal {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    tokio::select! {
        _ = recv(&mut sigterm) => {
            tracing::info!("Received SIGTERM signal");
        }
        _ = recv(&mut sigint) => {
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
