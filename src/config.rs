//! Configuration types for comment-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Every field has a default, so an empty JSON object is a valid config:
///
/// ```
/// use comment_dl::Config;
///
/// let config = Config::from_json_str("{}").unwrap();
/// assert_eq!(config.rate_limit.capacity, 1);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Comment listing API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Shared outbound rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-task retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Where and how comment files are written
    #[serde(default)]
    pub output: OutputConfig,

    /// Maximum comments fetched per resource when the caller does not pass one (default: 20)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            output: OutputConfig::default(),
            max_results: default_max_results(),
        }
    }
}

impl Config {
    /// Parse a JSON configuration string
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.capacity == 0 {
            return Err(Error::config(
                "rate_limit.capacity",
                "rate limit capacity must be at least 1",
            ));
        }
        if self.rate_limit.interval.is_zero() {
            return Err(Error::config(
                "rate_limit.interval",
                "rate limit refill interval must be greater than zero",
            ));
        }
        if self.api.max_page_size == 0 {
            return Err(Error::config(
                "api.max_page_size",
                "page size must be at least 1",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!(
                    "backoff multiplier must be a finite number >= 1.0, got {}",
                    self.retry.backoff_multiplier
                ),
            ));
        }
        if self.output.file_prefix.is_empty() {
            return Err(Error::config(
                "output.file_prefix",
                "output file prefix must not be empty",
            ));
        }
        Ok(())
    }
}

/// Comment listing API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Data API (default: "https://www.googleapis.com/youtube/v3")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// Largest page the API will return in one call (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Token bucket settings for the shared rate limiter
///
/// The bucket holds at most `capacity` permits and regains one permit every
/// `interval`. The default (1 permit per second) matches a conservative API quota.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (default: 1)
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Time to refill one permit (default: 1 second)
    #[serde(default = "default_interval", with = "duration_ms_serde")]
    pub interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            interval: default_interval(),
        }
    }
}

/// Retry configuration for failed fetch attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 1.5)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Give up once this much time has passed since the first attempt
    /// (default: 15 minutes, None = no time bound)
    #[serde(
        default = "default_max_elapsed",
        with = "optional_duration_ms_serde"
    )]
    pub max_elapsed: Option<Duration>,

    /// Retry locators that fail to parse like any other failure (default: true)
    ///
    /// When false, an invalid locator fails its task on the first attempt.
    #[serde(default = "default_true")]
    pub retry_invalid_locators: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            max_elapsed: default_max_elapsed(),
            retry_invalid_locators: true,
        }
    }
}

/// Output file configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory comment files are written into (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name prefix; files are named `<prefix>_<video id>.txt` (default: "comments")
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Drop repeated locators from a batch before spawning tasks (default: false)
    #[serde(default)]
    pub dedupe_locators: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            dedupe_locators: false,
        }
    }
}

fn default_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_page_size() -> u32 {
    100
}

fn default_capacity() -> u32 {
    1
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_elapsed() -> Option<Duration> {
    Some(Duration::from_secs(15 * 60))
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_prefix() -> String {
    "comments".to_string()
}

fn default_max_results() -> u32 {
    20
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper (milliseconds)
mod optional_duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit.capacity, 1);
        assert_eq!(config.rate_limit.interval, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_elapsed, Some(Duration::from_secs(900)));
        assert!(config.retry.jitter);
        assert!(config.retry.retry_invalid_locators);
        assert_eq!(config.api.max_page_size, 100);
        assert_eq!(config.output.file_prefix, "comments");
        assert_eq!(config.output.output_dir, PathBuf::from("."));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config.max_results, 20);
        assert_eq!(
            config.api.base_url,
            "https://www.googleapis.com/youtube/v3"
        );
        assert_eq!(config.api.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "rate_limit": { "capacity": 3, "interval": 250 },
            "retry": { "max_attempts": 2, "max_elapsed": null, "jitter": false },
            "output": { "output_dir": "/tmp/out", "dedupe_locators": true }
        }"#;
        let config = Config::from_json_str(json).unwrap();

        assert_eq!(config.rate_limit.capacity, 3);
        assert_eq!(config.rate_limit.interval, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_elapsed, None);
        assert!(!config.retry.jitter);
        // Untouched retry fields keep their defaults
        assert_eq!(config.retry.backoff_multiplier, 1.5);
        assert_eq!(config.output.output_dir, PathBuf::from("/tmp/out"));
        assert!(config.output.dedupe_locators);
        assert_eq!(config.output.file_prefix, "comments");
    }

    #[test]
    fn test_json_round_trip_keeps_millis() {
        let mut config = Config::default();
        config.retry.initial_delay = Duration::from_millis(1234);
        let json = serde_json::to_string(&config).unwrap();
        let parsed = Config::from_json_str(&json).unwrap();
        assert_eq!(parsed.retry.initial_delay, Duration::from_millis(1234));
        assert_eq!(parsed.retry.max_elapsed, config.retry.max_elapsed);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = Config::from_json_str(r#"{ "rate_limit": { "capacity": 0 } }"#).unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("rate_limit.capacity")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.rate_limit.interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "rate_limit.interval"
        ));
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_backoff() {
        for multiplier in [f64::INFINITY, f64::NAN] {
            let mut config = Config::default();
            config.retry.backoff_multiplier = multiplier;
            assert!(matches!(
                config.validate(),
                Err(Error::Config { key: Some(k), .. }) if k == "retry.backoff_multiplier"
            ));
        }

        // Large but finite multipliers are accepted; the delay caps at max_delay
        let mut config = Config::default();
        config.retry.backoff_multiplier = 1e300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_results": 7 }"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.max_results, 7);
    }

    #[test]
    fn test_from_json_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
