//! Common test utilities for comment-dl integration tests

#[allow(dead_code)]
pub mod stubs;

pub use stubs::*;

use comment_dl::Config;
use std::time::Duration;
use tempfile::TempDir;

/// Config writing into `dir`, with a fast limiter and short, deterministic backoff
///
/// The elapsed-time retry budget is off so long backoffs are really slept.
#[allow(dead_code)]
pub fn fast_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.output.output_dir = dir.path().to_path_buf();
    config.rate_limit.capacity = 50;
    config.rate_limit.interval = Duration::from_millis(1);
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.backoff_multiplier = 2.0;
    config.retry.jitter = false;
    config.retry.max_elapsed = None;
    config
}
