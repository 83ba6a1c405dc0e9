//! In-memory comment sources

use comment_dl::{
    ApiKey, CommentPage, CommentRecord, CommentSource, Error, PageRequest, RemoteError, Result,
    VideoId,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// How a stubbed video behaves
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Always returns these records in one page
    Serve(Vec<CommentRecord>),
    /// Fails this many times, then serves the records
    FailThenServe(u32, Vec<CommentRecord>),
    /// Always fails with a quota error
    AlwaysFail,
}

/// Stub [`CommentSource`] keyed by video id, recording every call
pub struct StubSource {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl StubSource {
    pub fn new<I>(behaviors: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Behavior)>,
    {
        Self {
            behaviors: behaviors
                .into_iter()
                .map(|(id, b)| (id.to_string(), b))
                .collect(),
            calls: Mutex::new(vec![]),
        }
    }

    /// Number of remote calls made for `id`
    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == id)
            .count()
    }

    /// Timestamps of every remote call, in call order
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait::async_trait]
impl CommentSource for StubSource {
    async fn fetch_page(
        &self,
        video_id: &VideoId,
        request: &PageRequest,
        _api_key: &ApiKey,
    ) -> Result<CommentPage> {
        let previous = self.calls_for(video_id.as_str()) as u32;
        self.calls
            .lock()
            .unwrap()
            .push((video_id.to_string(), Instant::now()));

        let quota_error = || {
            Error::Remote(RemoteError::Status {
                status: 403,
                message: "quotaExceeded".to_string(),
            })
        };

        let records = match self.behaviors.get(video_id.as_str()) {
            Some(Behavior::Serve(records)) => records.clone(),
            Some(Behavior::FailThenServe(failures, records)) => {
                if previous < *failures {
                    return Err(quota_error());
                }
                records.clone()
            }
            Some(Behavior::AlwaysFail) => return Err(quota_error()),
            None => {
                return Err(Error::Remote(RemoteError::Status {
                    status: 404,
                    message: format!("video {video_id} not found"),
                }));
            }
        };

        Ok(CommentPage {
            records: records
                .into_iter()
                .take(request.max_results as usize)
                .collect(),
            next_page_token: None,
        })
    }
}
