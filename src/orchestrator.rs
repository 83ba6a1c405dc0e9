//! Fetch orchestration: one concurrent task per locator
//!
//! Task lifecycle:
//! 1. Extract the video id from the locator
//! 2. For each page: acquire a rate-limiter permit, then fetch the page
//! 3. Append the collected records to the video's comment file
//! 4. On failure, back off and repeat from step 1 until the retry budget is spent
//!
//! A failing or panicking task never affects its siblings; `run` always waits
//! for every task and reports each one individually.

use crate::client::{CommentSource, PageRequest, YouTubeClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryingFetcher;
use crate::sink::CommentSink;
use crate::types::{ApiKey, Event, FetchTask, RunReport, TaskOutcome, TaskStatus, VideoId};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Fans out fetch tasks against one shared rate limiter
///
/// The limiter lives as long as the orchestrator, so consecutive runs draw
/// from the same bucket.
pub struct FetchOrchestrator {
    config: Arc<Config>,
    limiter: RateLimiter,
    fetcher: RetryingFetcher,
    sink: CommentSink,
    source: Arc<dyn CommentSource>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl FetchOrchestrator {
    /// Create an orchestrator that talks to the YouTube Data API
    pub fn new(config: Config) -> Result<Self> {
        let client = YouTubeClient::new(&config.api)?;
        Self::with_source(config, Arc::new(client))
    }

    /// Create an orchestrator over any [`CommentSource`]
    pub fn with_source(config: Config, source: Arc<dyn CommentSource>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            limiter: RateLimiter::from_config(&config.rate_limit),
            fetcher: RetryingFetcher::new(config.retry.clone()),
            sink: CommentSink::from_config(&config.output),
            config: Arc::new(config),
            source,
            cancel: CancellationToken::new(),
            event_tx,
        })
    }

    /// Replace the cancellation token, e.g. with one shared by the whole process
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribe to run events
    ///
    /// Failure diagnostics (`TaskFailed`, `TaskCancelled`) are delivered here
    /// as well as logged.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The token that cancels waiting tasks when fired
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fire the cancellation signal
    ///
    /// Tasks waiting on a permit or a backoff sleep stop promptly and report
    /// [`TaskStatus::Cancelled`]. The signal stays fired for later runs.
    pub fn shutdown(&self) {
        tracing::info!("cancellation requested");
        self.cancel.cancel();
    }

    /// The shared rate limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch up to `max_results` comments for every locator, concurrently
    ///
    /// Blocks until every task has succeeded, exhausted its retries, or been
    /// cancelled. Never fails as a whole: per-task failures are logged, sent
    /// as events, and listed in the returned report.
    pub async fn run<I, S>(&self, locators: I, max_results: u32, api_key: &ApiKey) -> RunReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let started_at = Utc::now();
        let tasks = self.plan(locators, max_results);

        tracing::info!(tasks = tasks.len(), max_results, "starting fetch run");

        let ctx = TaskContext {
            limiter: self.limiter.clone(),
            fetcher: self.fetcher.clone(),
            sink: self.sink.clone(),
            source: Arc::clone(&self.source),
            cancel: self.cancel.clone(),
            event_tx: self.event_tx.clone(),
            api_key: api_key.clone(),
            max_page_size: self.config.api.max_page_size,
            retry_invalid_locators: self.config.retry.retry_invalid_locators,
        };

        let handles: Vec<_> = tasks
            .iter()
            .map(|task| tokio::spawn(run_fetch_task(ctx.clone(), task.clone())))
            .collect();

        let joined = futures::future::join_all(handles).await;

        let outcomes: Vec<TaskOutcome> = tasks
            .into_iter()
            .zip(joined)
            .map(|(task, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = format!("task aborted: {e}");
                    tracing::error!(locator = %task.locator, error = %error, "fetch task panicked");
                    self.event_tx
                        .send(Event::TaskFailed {
                            locator: task.locator.clone(),
                            error: error.clone(),
                        })
                        .ok();
                    TaskOutcome {
                        video_id: VideoId::from_locator(&task.locator).ok(),
                        locator: task.locator,
                        status: TaskStatus::Exhausted { error, attempts: 0 },
                    }
                }
            })
            .collect();

        let report = RunReport {
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };

        let succeeded = report.succeeded().count();
        let failed = report.failed().count();
        let cancelled = report.cancelled().count();
        tracing::info!(succeeded, failed, cancelled, "fetch run finished");
        self.event_tx
            .send(Event::RunFinished {
                succeeded,
                failed,
                cancelled,
            })
            .ok();

        report
    }

    /// Turn caller input into tasks, dropping repeated locators if configured
    fn plan<I, S>(&self, locators: I, max_results: u32) -> Vec<FetchTask>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        locators
            .into_iter()
            .map(|locator| -> String { locator.into() })
            .filter(|locator| {
                if !self.config.output.dedupe_locators || seen.insert(locator.clone()) {
                    return true;
                }
                tracing::debug!(locator = %locator, "skipping repeated locator");
                false
            })
            .map(|locator| FetchTask {
                locator,
                max_results,
            })
            .collect()
    }
}

/// Everything one fetch task needs, cloned per task
#[derive(Clone)]
struct TaskContext {
    limiter: RateLimiter,
    fetcher: RetryingFetcher,
    sink: CommentSink,
    source: Arc<dyn CommentSource>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
    api_key: ApiKey,
    max_page_size: u32,
    retry_invalid_locators: bool,
}

/// Successful attempt result
struct Written {
    video_id: VideoId,
    records: usize,
    path: PathBuf,
}

/// Drive one task from start to a terminal state
async fn run_fetch_task(ctx: TaskContext, task: FetchTask) -> TaskOutcome {
    let FetchTask {
        locator,
        max_results,
    } = task;

    ctx.event_tx
        .send(Event::TaskStarted {
            locator: locator.clone(),
        })
        .ok();

    if !ctx.retry_invalid_locators
        && let Err(e) = VideoId::from_locator(&locator)
    {
        return ctx.exhausted(locator, e, 1);
    }

    let mut attempts = 0_u32;
    let result = ctx
        .fetcher
        .execute_observed(
            &ctx.cancel,
            || {
                attempts += 1;
                ctx.attempt(&locator, max_results, attempts)
            },
            |error, retry, delay| {
                ctx.event_tx
                    .send(Event::RetryScheduled {
                        locator: locator.clone(),
                        attempt: retry,
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    })
                    .ok();
            },
        )
        .await;

    match result {
        Ok(written) => {
            tracing::info!(
                video_id = %written.video_id,
                records = written.records,
                path = %written.path.display(),
                attempts,
                "comments written"
            );
            ctx.event_tx
                .send(Event::TaskSucceeded {
                    video_id: written.video_id.clone(),
                    records: written.records,
                    path: written.path.clone(),
                })
                .ok();
            TaskOutcome {
                locator,
                video_id: Some(written.video_id),
                status: TaskStatus::Succeeded {
                    records: written.records,
                    path: written.path,
                },
            }
        }
        Err(Error::Cancelled) => {
            tracing::warn!(locator = %locator, attempts, "fetch task cancelled");
            ctx.event_tx
                .send(Event::TaskCancelled {
                    locator: locator.clone(),
                })
                .ok();
            TaskOutcome {
                video_id: VideoId::from_locator(&locator).ok(),
                locator,
                status: TaskStatus::Cancelled,
            }
        }
        Err(e) => ctx.exhausted(locator, e, attempts),
    }
}

impl TaskContext {
    /// One attempt: extract, fetch every page under a fresh permit, write
    async fn attempt(&self, locator: &str, max_results: u32, attempt: u32) -> Result<Written> {
        let video_id = VideoId::from_locator(locator)?;

        let mut collected = Vec::new();
        let mut page_token = None;
        loop {
            let remaining = max_results.saturating_sub(collected.len() as u32);
            if remaining == 0 {
                break;
            }
            let request = PageRequest {
                max_results: remaining.min(self.max_page_size),
                page_token: page_token.take(),
            };

            self.limiter.acquire(&self.cancel).await?;
            tracing::debug!(video_id = %video_id, attempt, page_size = request.max_results, "fetching comment page");

            let page = self
                .source
                .fetch_page(&video_id, &request, &self.api_key)
                .await?;

            let received = page.records.len();
            self.event_tx
                .send(Event::PageFetched {
                    video_id: video_id.clone(),
                    records: received,
                    attempt,
                })
                .ok();

            collected.extend(page.records.into_iter().take(remaining as usize));
            match page.next_page_token {
                // An empty page with a token would loop forever
                Some(token) if received > 0 => page_token = Some(token),
                _ => break,
            }
        }

        let mut handle = self.sink.open(&video_id)?;
        let records = handle.append_all(collected)?;
        let path = handle.path().to_path_buf();
        tokio::task::spawn_blocking(move || handle.close())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "sink close task panicked: {e}"
                )))
            })??;

        Ok(Written {
            video_id,
            records,
            path,
        })
    }

    fn exhausted(&self, locator: String, error: Error, attempts: u32) -> TaskOutcome {
        tracing::error!(locator = %locator, error = %error, attempts, "failed to retrieve comments");
        let message = error.to_string();
        self.event_tx
            .send(Event::TaskFailed {
                locator: locator.clone(),
                error: message.clone(),
            })
            .ok();
        TaskOutcome {
            video_id: VideoId::from_locator(&locator).ok(),
            locator,
            status: TaskStatus::Exhausted {
                error: message,
                attempts,
            },
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CommentPage;
    use crate::types::CommentRecord;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves pages from a fixed list of records, recording every request
    struct PagedSource {
        records: Vec<CommentRecord>,
        page_size_cap: usize,
        requests: Mutex<Vec<PageRequest>>,
    }

    #[async_trait::async_trait]
    impl CommentSource for PagedSource {
        async fn fetch_page(
            &self,
            _video_id: &VideoId,
            request: &PageRequest,
            _api_key: &ApiKey,
        ) -> Result<CommentPage> {
            self.requests.lock().unwrap().push(request.clone());
            let start: usize = request
                .page_token
                .as_deref()
                .map(|t| t.parse().unwrap())
                .unwrap_or(0);
            let take = (request.max_results as usize).min(self.page_size_cap);
            let end = (start + take).min(self.records.len());
            Ok(CommentPage {
                records: self.records[start..end].to_vec(),
                next_page_token: (end < self.records.len()).then(|| end.to_string()),
            })
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.output.output_dir = dir.path().to_path_buf();
        config.rate_limit.capacity = 100;
        config.rate_limit.interval = Duration::from_millis(1);
        config.retry.initial_delay = Duration::from_millis(5);
        config.retry.jitter = false;
        config.retry.max_attempts = 2;
        config
    }

    fn numbered(n: usize) -> Vec<CommentRecord> {
        (0..n)
            .map(|i| CommentRecord::new(format!("user{i}"), format!("text {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_pagination_stops_at_max_results() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PagedSource {
            records: numbered(10),
            page_size_cap: 3,
            requests: Mutex::new(vec![]),
        });
        let mut config = test_config(&dir);
        config.api.max_page_size = 4;
        let orchestrator = FetchOrchestrator::with_source(config, source.clone()).unwrap();

        let report = orchestrator.run(["vid1"], 7, &ApiKey::new("k")).await;

        assert!(report.all_succeeded());
        let content = std::fs::read_to_string(dir.path().join("comments_vid1.txt")).unwrap();
        assert_eq!(content.lines().count(), 7);
        assert_eq!(content.lines().last(), Some("Comment from user6: text 6"));

        let sizes: Vec<u32> = source
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.max_results)
            .collect();
        // 4 requested, 3 served; then 4 of the remaining 4, 3 served; then 1
        assert_eq!(sizes, vec![4, 4, 1]);
    }

    #[tokio::test]
    async fn test_listing_shorter_than_max_results() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PagedSource {
            records: numbered(2),
            page_size_cap: 100,
            requests: Mutex::new(vec![]),
        });
        let orchestrator = FetchOrchestrator::with_source(test_config(&dir), source).unwrap();

        let report = orchestrator.run(["vid1"], 50, &ApiKey::new("k")).await;

        match &report.outcomes[0].status {
            TaskStatus::Succeeded { records, .. } => assert_eq!(*records, 2),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_locator_terminal_when_configured() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PagedSource {
            records: numbered(1),
            page_size_cap: 100,
            requests: Mutex::new(vec![]),
        });
        let mut config = test_config(&dir);
        config.retry.retry_invalid_locators = false;
        config.retry.max_attempts = 5;
        let orchestrator = FetchOrchestrator::with_source(config, source.clone()).unwrap();

        let report = orchestrator
            .run(["https://www.youtube.com/watch?list=x"], 5, &ApiKey::new("k"))
            .await;

        assert_eq!(
            report.outcomes[0].status,
            TaskStatus::Exhausted {
                error: "invalid locator 'https://www.youtube.com/watch?list=x': no video id found (expected a 'v' query parameter)".to_string(),
                attempts: 1,
            }
        );
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_locator_retried_by_default() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PagedSource {
            records: vec![],
            page_size_cap: 100,
            requests: Mutex::new(vec![]),
        });
        let orchestrator = FetchOrchestrator::with_source(test_config(&dir), source).unwrap();
        let mut events = orchestrator.subscribe();

        let report = orchestrator.run(["not a/valid id"], 5, &ApiKey::new("k")).await;

        match &report.outcomes[0].status {
            TaskStatus::Exhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }

        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::RetryScheduled { .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_dedupe_locators() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PagedSource {
            records: numbered(1),
            page_size_cap: 100,
            requests: Mutex::new(vec![]),
        });
        let mut config = test_config(&dir);
        config.output.dedupe_locators = true;
        let orchestrator = FetchOrchestrator::with_source(config, source).unwrap();

        let report = orchestrator
            .run(["vid1", "vid2", "vid1"], 5, &ApiKey::new("k"))
            .await;

        assert_eq!(report.outcomes.len(), 2);
        let content = std::fs::read_to_string(dir.path().join("comments_vid1.txt")).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_results_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PagedSource {
            records: numbered(3),
            page_size_cap: 100,
            requests: Mutex::new(vec![]),
        });
        let orchestrator =
            FetchOrchestrator::with_source(test_config(&dir), source.clone()).unwrap();

        let report = orchestrator.run(["vid1"], 0, &ApiKey::new("k")).await;

        assert!(report.all_succeeded());
        assert!(source.requests.lock().unwrap().is_empty());
    }

    /// Panics for one video id, serves a single record for every other
    struct PanickingSource {
        panic_on: &'static str,
    }

    #[async_trait::async_trait]
    impl CommentSource for PanickingSource {
        async fn fetch_page(
            &self,
            video_id: &VideoId,
            _request: &PageRequest,
            _api_key: &ApiKey,
        ) -> Result<CommentPage> {
            if video_id.as_str() == self.panic_on {
                panic!("source blew up for {video_id}");
            }
            Ok(CommentPage {
                records: numbered(1),
                next_page_token: None,
            })
        }
    }

    #[tokio::test]
    async fn test_panicking_task_reported_as_aborted() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(PanickingSource { panic_on: "boom" });
        let orchestrator = FetchOrchestrator::with_source(test_config(&dir), source).unwrap();
        let mut events = orchestrator.subscribe();

        let report = orchestrator.run(["boom", "ok"], 5, &ApiKey::new("k")).await;

        assert_eq!(report.outcomes[0].locator, "boom");
        match &report.outcomes[0].status {
            TaskStatus::Exhausted { error, attempts } => {
                assert_eq!(*attempts, 0);
                assert!(error.contains("task aborted"), "unexpected error: {error}");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(
            report.outcomes[0].video_id.as_ref().map(VideoId::as_str),
            Some("boom")
        );

        // The sibling is unaffected
        assert!(report.outcomes[1].is_success());
        assert!(dir.path().join("comments_ok.txt").exists());

        let mut failed = vec![];
        while let Ok(event) = events.try_recv() {
            if let Event::TaskFailed { locator, .. } = event {
                failed.push(locator);
            }
        }
        assert_eq!(failed, vec!["boom".to_string()]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.rate_limit.capacity = 0;
        let source = Arc::new(PagedSource {
            records: vec![],
            page_size_cap: 1,
            requests: Mutex::new(vec![]),
        });

        assert!(matches!(
            FetchOrchestrator::with_source(config, source),
            Err(Error::Config { .. })
        ));
    }
}
