//! Comment listing API client
//!
//! [`CommentSource`] is the seam between the fetch pipeline and the remote
//! service: the orchestrator only ever asks it for one page at a time, and
//! tests substitute in-memory implementations.

use crate::config::ApiConfig;
use crate::error::{Error, RemoteError, Result};
use crate::types::{ApiKey, CommentRecord, VideoId};
use serde::Deserialize;

/// Parameters for one page request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum records to return in this page
    pub max_results: u32,
    /// Continuation token from the previous page, if any
    pub page_token: Option<String>,
}

/// One page of comments
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommentPage {
    /// Records in API order
    pub records: Vec<CommentRecord>,
    /// Token for the following page, if the listing continues
    pub next_page_token: Option<String>,
}

/// Remote capability that lists top-level comments for a video
#[async_trait::async_trait]
pub trait CommentSource: Send + Sync {
    /// Fetch one page of comments
    ///
    /// Each call is one outbound request; callers acquire a rate-limiter
    /// permit before every call.
    async fn fetch_page(
        &self,
        video_id: &VideoId,
        request: &PageRequest,
        api_key: &ApiKey,
    ) -> Result<CommentPage>;
}

/// [`CommentSource`] backed by the YouTube Data API v3 `commentThreads` endpoint
#[derive(Clone, Debug)]
pub struct YouTubeClient {
    http: reqwest::Client,
    base_url: String,
}

impl YouTubeClient {
    /// Build a client from the API config section
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(RemoteError::Transport)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/commentThreads", self.base_url)
    }
}

#[async_trait::async_trait]
impl CommentSource for YouTubeClient {
    async fn fetch_page(
        &self,
        video_id: &VideoId,
        request: &PageRequest,
        api_key: &ApiKey,
    ) -> Result<CommentPage> {
        let max_results = request.max_results.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("part", "snippet"),
            ("videoId", video_id.as_str()),
            ("maxResults", max_results.as_str()),
            ("textFormat", "plainText"),
            ("key", api_key.expose()),
        ];
        if let Some(token) = &request.page_token {
            query.push(("pageToken", token.as_str()));
        }

        let response = self
            .http
            .get(self.endpoint())
            .query(&query)
            .send()
            .await
            .map_err(RemoteError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(RemoteError::Transport)?;

        if !status.is_success() {
            return Err(Error::Remote(RemoteError::Status {
                status: status.as_u16(),
                message: api_error_message(&body),
            }));
        }

        let list: CommentThreadList = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let records = list
            .items
            .into_iter()
            .map(|item| {
                let snippet = item.snippet.top_level_comment.snippet;
                CommentRecord::new(snippet.author_display_name, snippet.text_display)
            })
            .collect();

        Ok(CommentPage {
            records,
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw body
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadList {
    #[serde(default)]
    items: Vec<CommentThread>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct CommentThread {
    snippet: ThreadSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadSnippet {
    top_level_comment: TopLevelComment,
}

#[derive(Deserialize)]
struct TopLevelComment {
    snippet: CommentSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    #[serde(default)]
    author_display_name: String,
    #[serde(default)]
    text_display: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}
