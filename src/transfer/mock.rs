//! Mock transport for testing
//!
//! Serves canned bodies or errors per URL without touching the network.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use super::{ChunkSink, FetchMeta, Transport};
use crate::error::TransportError;

/// Bodies are streamed in chunks of this size
const MOCK_CHUNK_SIZE: usize = 4;

#[derive(Clone)]
enum MockResponse {
    Body(Vec<u8>),
    Error(TransportError),
    /// Never completes
    Hang,
    /// Completes with the body once the gate is opened
    Gated(Arc<Notify>, Vec<u8>),
}

/// Mock transport.
///
/// Configure responses with the builder methods, then hand it to a
/// `TransferHandle` or `CacheManager`. Unknown URLs fail with HTTP 404.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, body: Vec<u8>) -> Self {
        self.set_body(url, body);
        self
    }

    pub fn with_error(self, url: &str, err: TransportError) -> Self {
        self.set_error(url, err);
        self
    }

    pub fn with_hang(self, url: &str) -> Self {
        self.responses
            .lock()
            .insert(url.to_string(), MockResponse::Hang);
        self
    }

    /// Body released only after the returned gate is notified
    pub fn with_gate(self, url: &str, body: Vec<u8>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.responses
            .lock()
            .insert(url.to_string(), MockResponse::Gated(gate.clone(), body));
        (self, gate)
    }

    /// Replace the response for a URL mid-test
    pub fn set_body(&self, url: &str, body: Vec<u8>) {
        self.responses
            .lock()
            .insert(url.to_string(), MockResponse::Body(body));
    }

    pub fn set_error(&self, url: &str, err: TransportError) {
        self.responses
            .lock()
            .insert(url.to_string(), MockResponse::Error(err));
    }

    /// Number of fetches started for a URL
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

async fn stream_body(body: &[u8], sink: &ChunkSink) -> Result<FetchMeta, TransportError> {
    for chunk in body.chunks(MOCK_CHUNK_SIZE) {
        sink.send(Bytes::copy_from_slice(chunk))
            .map_err(|_| TransportError::Task("receiver dropped".to_string()))?;
        tokio::task::yield_now().await;
    }
    Ok(FetchMeta {
        status: 200,
        content_length: Some(body.len() as u64),
        last_modified: None,
    })
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &str, sink: ChunkSink) -> Result<FetchMeta, TransportError> {
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
        let response = self.responses.lock().get(url).cloned();

        match response {
            Some(MockResponse::Body(body)) => stream_body(&body, &sink).await,
            Some(MockResponse::Error(err)) => Err(err),
            Some(MockResponse::Hang) => futures::future::pending().await,
            Some(MockResponse::Gated(gate, body)) => {
                gate.notified().await;
                stream_body(&body, &sink).await
            }
            None => Err(TransportError::Status {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}
