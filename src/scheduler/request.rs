//! Queued requests and their single-assignment result handles.
//!
//! - `QueuedRequest`: a prompt waiting in the queue plus the slot to complete
//! - `ResponseSlot`: completion side, consumed on first use
//! - `ResponseHandle`: awaitable side returned to the submitter
//! - `RequestError`: every way a request can fail

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pin_project_lite::pin_project;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::LlmError;
use crate::llm::GenerationResponse;

/// Errors a submitted request can resolve to.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The manager is not accepting submissions.
    #[error("Queue manager is not running")]
    NotRunning,

    /// The queue was at capacity when the request was submitted.
    #[error("Request queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// The request was still queued when the manager shut down.
    #[error("Request cancelled: queue manager shutting down")]
    ShuttingDown,

    /// The worker holding the request stopped before completing it.
    #[error("Request abandoned: worker stopped before completing it")]
    Abandoned,

    /// The upstream call failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Result delivered through a [`ResponseHandle`].
pub type RequestResult = Result<GenerationResponse, RequestError>;

/// Creates a connected slot/handle pair for `trace_id`.
pub fn response_channel(trace_id: Uuid) -> (ResponseSlot, ResponseHandle) {
    let (tx, rx) = oneshot::channel();
    (ResponseSlot { trace_id, tx }, ResponseHandle { trace_id, rx })
}

/// Completion side of a result handle.
///
/// Completing consumes the slot, so a request resolves exactly once. Dropping
/// a slot without completing it resolves the handle to
/// `RequestError::Abandoned`.
#[derive(Debug)]
pub struct ResponseSlot {
    trace_id: Uuid,
    tx: oneshot::Sender<RequestResult>,
}

impl ResponseSlot {
    /// Delivers `result`. Returns false if the submitter no longer listens.
    pub fn complete(self, result: RequestResult) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Shorthand for completing with an error.
    pub fn fail(self, error: RequestError) -> bool {
        self.complete(Err(error))
    }

    /// Returns true if the submitter dropped its handle.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Trace id shared with the handle.
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }
}

pin_project! {
    /// Awaitable result of a submitted request.
    ///
    /// Resolves once the request succeeds, fails, or is cancelled. Because it
    /// is a plain future it can be raced against a timeout or chained with
    /// combinators.
    #[derive(Debug)]
    pub struct ResponseHandle {
        trace_id: Uuid,
        #[pin]
        rx: oneshot::Receiver<RequestResult>,
    }
}

impl ResponseHandle {
    /// Returns a handle that is already failed with `error`.
    pub fn failed(trace_id: Uuid, error: RequestError) -> Self {
        let (slot, handle) = response_channel(trace_id);
        slot.fail(error);
        handle
    }

    /// Trace id assigned at submission.
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Waits up to `timeout` for the result.
    ///
    /// Returns `None` on timeout. The request itself keeps running.
    pub async fn wait_timeout(self, timeout: Duration) -> Option<RequestResult> {
        tokio::time::timeout(timeout, self).await.ok()
    }
}

impl Future for ResponseHandle {
    type Output = RequestResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A prompt waiting in the queue.
#[derive(Debug)]
pub struct QueuedRequest {
    /// Prompt text to send upstream.
    pub prompt: String,
    /// Identifier used to correlate logs for this request.
    pub trace_id: Uuid,
    /// Wall-clock submission time.
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic submission time, used for wait-time measurement.
    enqueued_instant: std::time::Instant,
    /// Where the worker delivers the outcome.
    pub slot: ResponseSlot,
}

impl QueuedRequest {
    /// Creates a request and the handle its submitter will await.
    pub fn new(prompt: impl Into<String>) -> (Self, ResponseHandle) {
        let trace_id = Uuid::new_v4();
        let (slot, handle) = response_channel(trace_id);
        let request = Self {
            prompt: prompt.into(),
            trace_id,
            enqueued_at: Utc::now(),
            enqueued_instant: std::time::Instant::now(),
            slot,
        };
        (request, handle)
    }

    /// Time spent since submission.
    pub fn wait_time(&self) -> Duration {
        self.enqueued_instant.elapsed()
    }

    /// Submission time as milliseconds since the Unix epoch.
    pub fn enqueued_at_millis(&self) -> i64 {
        self.enqueued_at.timestamp_millis()
    }
}
