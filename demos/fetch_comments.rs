//! Fetch comments for one or more videos
//!
//! This demo shows the full pipeline:
//! - Loading configuration (optional JSON file)
//! - Reading the API key from `YOUTUBE_API_KEY`
//! - Subscribing to run events
//! - Cancelling cleanly on Ctrl+C
//!
//! ```bash
//! YOUTUBE_API_KEY=... cargo run --example fetch_comments -- \
//!     [--config config.json] [--max 50] <video url or id>...
//! ```

use comment_dl::{ApiKey, Config, Event, FetchOrchestrator, TaskStatus, cancel_on_signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config_path = None;
    let mut max_results = None;
    let mut locators = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--max" => max_results = args.next().map(|n| n.parse::<u32>()).transpose()?,
            _ => locators.push(arg),
        }
    }

    if locators.is_empty() {
        eprintln!("usage: fetch_comments [--config FILE] [--max N] <video url or id>...");
        std::process::exit(2);
    }

    let config = match config_path {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    let max_results = max_results.unwrap_or(config.max_results);
    let api_key = ApiKey::from_env()?;

    let orchestrator = FetchOrchestrator::new(config)?;
    cancel_on_signal(orchestrator.cancel_token());

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::PageFetched {
                    video_id, records, ..
                } => println!("  {video_id}: fetched {records} comments"),
                Event::RetryScheduled {
                    locator,
                    attempt,
                    delay_ms,
                    error,
                } => println!("  {locator}: retry #{attempt} in {delay_ms}ms ({error})"),
                _ => {}
            }
        }
    });

    let report = orchestrator.run(locators, max_results, &api_key).await;

    for outcome in &report.outcomes {
        match &outcome.status {
            TaskStatus::Succeeded { records, path } => {
                println!("✓ {}: {} comments -> {}", outcome.locator, records, path.display());
            }
            TaskStatus::Exhausted { error, attempts } => {
                println!("✗ {}: failed after {} attempts: {}", outcome.locator, attempts, error);
            }
            TaskStatus::Cancelled => println!("- {}: cancelled", outcome.locator),
        }
    }

    Ok(())
}
