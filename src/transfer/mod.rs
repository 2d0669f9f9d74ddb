//! In-flight network transfers
//!
//! A [`TransferHandle`] owns exactly one download: the spawned transport task,
//! the channel the task streams chunks over, and the destination buffer. The
//! buffer is only reachable through the handle. Dropping the handle closes it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::error::TransportError;

pub mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpTransport;
#[cfg(test)]
pub use mock::MockTransport;

/// Sending half handed to a [`Transport`] for streaming response bytes
pub type ChunkSink = mpsc::UnboundedSender<Bytes>;

/// Raw "fetch(url) -> bytes" capability.
///
/// Implementations stream the body into `sink` and return response metadata
/// once the body is complete. Errors are returned, never panicked.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, sink: ChunkSink) -> Result<FetchMeta, TransportError>;
}

/// Response metadata reported by a completed fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchMeta {
    /// HTTP status code
    pub status: u16,
    /// Declared body length, if the server sent one
    pub content_length: Option<u64>,
    /// Parsed `Last-Modified` header
    pub last_modified: Option<DateTime<Utc>>,
}

/// How a transfer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded(FetchMeta),
    Failed(TransportError),
    /// Closed by the caller while still active
    Canceled,
}

/// Result of polling a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Active { received: usize },
    Finished(TransferOutcome),
}

/// Exclusively-owned in-flight transfer of one URL into one buffer.
///
/// Not `Clone`. Moving the handle moves ownership of the transfer.
pub struct TransferHandle {
    url: String,
    buffer: Vec<u8>,
    chunks: Option<mpsc::UnboundedReceiver<Bytes>>,
    task: Option<JoinHandle<Result<FetchMeta, TransportError>>>,
    done: watch::Receiver<bool>,
    outcome: Option<TransferOutcome>,
}

impl TransferHandle {
    /// Begin fetching `url` on the current tokio runtime.
    ///
    /// `reserve_size` pre-allocates the buffer; bodies larger than that
    /// simply grow it.
    pub fn start(
        transport: Arc<dyn Transport>,
        url: &str,
        reserve_size: usize,
    ) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Task(format!("no async runtime: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let task_url = url.to_string();
        let task = runtime.spawn(async move {
            let result = transport.fetch(&task_url, tx).await;
            let _ = done_tx.send(true);
            result
        });

        log::debug!("Transfer started: {} (reserve {} bytes)", url, reserve_size);

        Ok(Self {
            url: url.to_string(),
            buffer: Vec::with_capacity(reserve_size),
            chunks: Some(rx),
            task: Some(task),
            done: done_rx,
            outcome: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bytes received so far (as of the last poll)
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Give up the received bytes; only meaningful once finished
    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Receiver that flips to `true` when the transport returns.
    ///
    /// Lets a caller await completion without holding the handle.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none() && self.chunks.is_none()
    }

    /// Non-blocking progress check
    pub fn poll(&mut self) -> TransferStatus {
        if let Some(outcome) = &self.outcome {
            return TransferStatus::Finished(outcome.clone());
        }

        self.drain();

        let Some(task) = self.task.as_mut() else {
            // Closed without an outcome cannot happen, but report it as canceled
            return self.settle(TransferOutcome::Canceled);
        };

        if !task.is_finished() {
            return TransferStatus::Active {
                received: self.buffer.len(),
            };
        }

        match task.now_or_never() {
            Some(result) => {
                self.task = None;
                // The task has returned, so every chunk is already queued
                self.drain();
                let outcome = outcome_from_join(result);
                self.settle(outcome)
            }
            None => TransferStatus::Active {
                received: self.buffer.len(),
            },
        }
    }

    /// Terminate the transfer if still active and release transport resources.
    ///
    /// Idempotent. A transfer that already finished keeps its outcome; one that
    /// was still running becomes [`TransferOutcome::Canceled`].
    pub fn close(&mut self) -> TransferOutcome {
        if let TransferStatus::Finished(outcome) = self.poll() {
            self.release();
            return outcome;
        }

        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Transfer canceled: {}", self.url);
        }
        self.release();
        self.outcome = Some(TransferOutcome::Canceled);
        TransferOutcome::Canceled
    }

    fn drain(&mut self) {
        if let Some(rx) = self.chunks.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                self.buffer.extend_from_slice(&chunk);
            }
        }
    }

    fn settle(&mut self, outcome: TransferOutcome) -> TransferStatus {
        self.outcome = Some(outcome.clone());
        TransferStatus::Finished(outcome)
    }

    fn release(&mut self) {
        self.chunks = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("url", &self.url)
            .field("received", &self.buffer.len())
            .field("outcome", &self.outcome)
            .finish()
    }
}

fn outcome_from_join(
    result: Result<Result<FetchMeta, TransportError>, JoinError>,
) -> TransferOutcome {
    match result {
        Ok(Ok(meta)) => TransferOutcome::Succeeded(meta),
        Ok(Err(err)) => TransferOutcome::Failed(err),
        Err(err) if err.is_cancelled() => TransferOutcome::Canceled,
        Err(err) => TransferOutcome::Failed(TransportError::Task(err.to_string())),
    }
}

/// Wait until the transport behind `done` has returned (or was dropped)
pub async fn completed(mut done: watch::Receiver<bool>) {
    let _ = done.wait_for(|finished| *finished).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn poll_until_finished(handle: &mut TransferHandle) -> TransferOutcome {
        completed(handle.completion()).await;
        loop {
            if let TransferStatus::Finished(outcome) = handle.poll() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_successful_transfer_fills_buffer() {
        let body = b"0123456789abcdefghij".to_vec();
        let transport = Arc::new(MockTransport::new().with_body("http://h/a", body.clone()));
        let mut handle = TransferHandle::start(transport, "http://h/a", 4).unwrap();

        let outcome = poll_until_finished(&mut handle).await;
        assert!(matches!(outcome, TransferOutcome::Succeeded(_)));
        // Reserve size is a hint, the buffer grew past it
        assert_eq!(handle.buffer(), body.as_slice());
    }

    #[tokio::test]
    async fn test_failed_transfer_reports_error() {
        let transport = Arc::new(MockTransport::new().with_error(
            "http://h/a",
            TransportError::Status {
                status: 500,
                url: "http://h/a".to_string(),
            },
        ));
        let mut handle = TransferHandle::start(transport, "http://h/a", 0).unwrap();

        let outcome = poll_until_finished(&mut handle).await;
        assert!(matches!(
            outcome,
            TransferOutcome::Failed(TransportError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_close_active_transfer_is_canceled_and_idempotent() {
        let transport = Arc::new(MockTransport::new().with_hang("http://h/slow"));
        let mut handle = TransferHandle::start(transport, "http://h/slow", 0).unwrap();

        assert!(matches!(handle.poll(), TransferStatus::Active { .. }));
        assert_eq!(handle.close(), TransferOutcome::Canceled);
        assert!(handle.is_closed());
        assert_eq!(handle.close(), TransferOutcome::Canceled);
        assert_eq!(
            handle.poll(),
            TransferStatus::Finished(TransferOutcome::Canceled)
        );
    }

    #[tokio::test]
    async fn test_close_after_finish_keeps_outcome() {
        let transport = Arc::new(MockTransport::new().with_body("http://h/a", b"abc".to_vec()));
        let mut handle = TransferHandle::start(transport, "http://h/a", 0).unwrap();
        poll_until_finished(&mut handle).await;

        assert!(matches!(handle.close(), TransferOutcome::Succeeded(_)));
        assert_eq!(handle.buffer(), b"abc");
    }

    #[tokio::test]
    async fn test_drop_aborts_transport_task() {
        let transport = Arc::new(MockTransport::new().with_hang("http://h/slow"));
        let handle = TransferHandle::start(transport.clone(), "http://h/slow", 0).unwrap();
        while transport.calls("http://h/slow") == 0 {
            tokio::task::yield_now().await;
        }
        let done = handle.completion();
        drop(handle);

        // Aborting the task drops the watch sender
        completed(done).await;
        assert_eq!(transport.calls("http://h/slow"), 1);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let transport = Arc::new(MockTransport::new());
        let err = TransferHandle::start(transport, "http://h/a", 0).unwrap_err();
        assert!(matches!(err, TransportError::Task(_)));
    }
}
