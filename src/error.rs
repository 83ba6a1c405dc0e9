//! Error types for comment-dl
//!
//! One crate-wide [`Error`] covers every failure a fetch task can hit:
//! - malformed locators ([`Error::InvalidLocator`])
//! - output stream failures ([`Error::Io`])
//! - transport and API-level failures ([`Error::Remote`])
//! - cancellation while suspended ([`Error::Cancelled`])

use thiserror::Error;

/// Result type alias for comment-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for comment-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The caller-supplied locator did not yield a usable resource identifier
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator {
        /// The locator exactly as supplied
        locator: String,
        /// Why extraction failed
        reason: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "rate_limit.capacity")
        key: Option<String>,
    },

    /// Output stream open/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote comment listing failed
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The shared cancellation signal fired while the task was suspended
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build an [`Error::InvalidLocator`]
    pub fn invalid_locator(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidLocator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`Error::Config`] pointing at a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// True if this error is the cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Failures talking to the comment-listing API
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection, TLS, timeout or body transfer failure
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API returned status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Message from the API error body, or the raw body if it was not JSON
        message: String,
    },

    /// The response body could not be decoded into comment threads
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Returned by the rate limiter when the cancellation signal wins the race
/// against a permit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Error::Cancelled
    }
}
