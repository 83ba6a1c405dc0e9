//! Core types for comment-dl

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Environment variable [`ApiKey::from_env`] reads
pub const API_KEY_ENV: &str = "YOUTUBE_API_KEY";

/// Identifier of the video whose comments are fetched
///
/// Always non-empty and limited to `[A-Za-z0-9_-]`, so it is safe to embed in
/// a file name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Validate a bare identifier
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::invalid_locator(id, "video id is empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::invalid_locator(
                id,
                "video id may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(id.to_string()))
    }

    /// Extract the identifier from a human-supplied locator
    ///
    /// Accepted forms:
    /// - `https://www.youtube.com/watch?v=<id>` (any host, the `v` query parameter)
    /// - `https://youtu.be/<id>`
    /// - `https://www.youtube.com/shorts/<id>` and `/embed/<id>`
    /// - a bare `<id>`
    ///
    /// ```
    /// use comment_dl::VideoId;
    ///
    /// let id = VideoId::from_locator("https://www.youtube.com/watch?v=abc123&t=42").unwrap();
    /// assert_eq!(id.as_str(), "abc123");
    /// ```
    pub fn from_locator(locator: &str) -> Result<Self> {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_locator(locator, "locator is empty"));
        }

        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            // Not a URL at all: treat it as a bare identifier
            Err(url::ParseError::RelativeUrlWithoutBase) => return Self::parse(trimmed),
            Err(e) => {
                return Err(Error::invalid_locator(
                    locator,
                    format!("failed to parse URL: {e}"),
                ));
            }
        };

        if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
            return Self::parse(&v).map_err(|e| relabel(e, locator));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let candidate = match (url.host_str(), segments.as_slice()) {
            (Some(host), [id]) if host.ends_with("youtu.be") => Some(*id),
            (_, ["shorts" | "embed" | "live", id, ..]) => Some(*id),
            _ => None,
        };

        match candidate {
            Some(id) => Self::parse(id).map_err(|e| relabel(e, locator)),
            None => Err(Error::invalid_locator(
                locator,
                "no video id found (expected a 'v' query parameter)",
            )),
        }
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Report extraction failures against the locator the caller gave, not the fragment
fn relabel(err: Error, locator: &str) -> Error {
    match err {
        Error::InvalidLocator { reason, .. } => Error::invalid_locator(locator, reason),
        other => other,
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for VideoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_locator(s)
    }
}

/// Opaque API key attached to every outbound call
///
/// `Debug` output is redacted so keys do not leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read the key from the `YOUTUBE_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self(key.trim().to_string())),
            _ => Err(Error::config(
                API_KEY_ENV,
                format!("{API_KEY_ENV} is not set"),
            )),
        }
    }

    /// The raw key, for building requests
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// One top-level comment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    /// Author's display name
    pub author: String,
    /// Comment text
    pub text: String,
}

impl CommentRecord {
    /// Build a record
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }

    /// Render the record as one output line, including the trailing newline
    ///
    /// Line breaks inside the text are flattened to spaces so one record is
    /// always one line.
    pub fn to_line(&self) -> String {
        format!(
            "Comment from {}: {}\n",
            flatten(&self.author),
            flatten(&self.text)
        )
    }
}

fn flatten(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// One unit of work: fetch up to `max_results` comments for one locator
#[derive(Clone, Debug)]
pub struct FetchTask {
    /// Locator exactly as supplied by the caller
    pub locator: String,
    /// Upper bound on comments written for this resource
    pub max_results: u32,
}

/// How a fetch task ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Comments were written to `path`
    Succeeded {
        /// Number of records appended
        records: usize,
        /// Output file
        path: PathBuf,
    },
    /// Retry budget spent; `error` is the last failure
    Exhausted {
        /// Description of the last error
        error: String,
        /// Attempts made, including the first
        attempts: u32,
    },
    /// The cancellation signal fired while the task was waiting
    Cancelled,
}

/// Per-locator result in a [`RunReport`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Locator exactly as supplied
    pub locator: String,
    /// Extracted identifier, if extraction succeeded
    pub video_id: Option<VideoId>,
    /// Final state
    pub status: TaskStatus,
}

impl TaskOutcome {
    /// True for [`TaskStatus::Succeeded`]
    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded { .. })
    }
}

/// Result of one [`FetchOrchestrator::run`](crate::FetchOrchestrator::run)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// One outcome per spawned task, in input order
    pub outcomes: Vec<TaskOutcome>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last task finished
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Outcomes that wrote comments
    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Outcomes that exhausted their retries
    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TaskStatus::Exhausted { .. }))
    }

    /// Outcomes stopped by cancellation
    pub fn cancelled(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Cancelled)
    }

    /// True if every task succeeded
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_success)
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was spawned for this locator
    TaskStarted {
        /// Locator as supplied
        locator: String,
    },

    /// One page of comments arrived
    PageFetched {
        /// Video whose comments were fetched
        video_id: VideoId,
        /// Records in this page
        records: usize,
        /// Attempt this page belongs to (1-based)
        attempt: u32,
    },

    /// An attempt failed and another is scheduled
    RetryScheduled {
        /// Locator as supplied
        locator: String,
        /// Retry number (1-based)
        attempt: u32,
        /// Backoff before the retry, in milliseconds
        delay_ms: u64,
        /// Error that caused the retry
        error: String,
    },

    /// Comments were written
    TaskSucceeded {
        /// Video whose comments were written
        video_id: VideoId,
        /// Records appended
        records: usize,
        /// Output file
        path: PathBuf,
    },

    /// The task exhausted its retries
    TaskFailed {
        /// Locator as supplied
        locator: String,
        /// Last error
        error: String,
    },

    /// The task was cancelled
    TaskCancelled {
        /// Locator as supplied
        locator: String,
    },

    /// Every task of the run has finished
    RunFinished {
        /// Tasks that succeeded
        succeeded: usize,
        /// Tasks that exhausted their retries
        failed: usize,
        /// Tasks that were cancelled
        cancelled: usize,
    },
}
