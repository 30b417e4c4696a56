//! Recording transport for tests

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::RequestError;
use crate::transport::{ApiResponse, RequestOptions, Transport};

type Responder = Box<dyn Fn(&str, usize) -> Result<ApiResponse, RequestError> + Send + Sync>;

/// Answers every request with `responder(url, call_index)` and records it
pub(crate) struct MockTransport {
    origin: Instant,
    responder: Responder,
    calls: Mutex<Vec<(Duration, String)>>,
}

impl MockTransport {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Result<ApiResponse, RequestError> + Send + Sync + 'static,
    {
        Self {
            origin: Instant::now(),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, url)| url.clone()).collect()
    }

    /// Time of each call since the transport was created
    pub(crate) fn call_offsets(&self) -> Vec<Duration> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, url: &str, _options: &RequestOptions) -> Result<ApiResponse, RequestError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((self.origin.elapsed(), url.to_string()));
            calls.len() - 1
        };
        (self.responder)(url, index)
    }
}
