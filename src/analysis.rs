//! Caller-facing adapter over the queue manager.
//!
//! Orchestration code asks for a completion by prompt and gets back either
//! the response text or an [`AnalysisError`] carrying a stable
//! [`ErrorCode`](crate::error::ErrorCode). Upstream errors pass through
//! unchanged so callers can still distinguish quota exhaustion from other
//! failures.

use std::sync::Arc;

use tracing::debug;

use crate::error::AnalysisError;
use crate::scheduler::{QueueManager, RequestError, ResponseHandle, WaitError};

/// Submits prompts through a shared [`QueueManager`].
#[derive(Clone)]
pub struct AnalysisClient {
    manager: Arc<QueueManager>,
}

impl AnalysisClient {
    /// Wraps a shared manager.
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    /// Submits `prompt` and waits for the response text.
    ///
    /// # Errors
    ///
    /// - `AnalysisError::QueueTimeout` when the request timeout elapses
    /// - `AnalysisError::QueueFull` when the queue rejected the submission
    /// - `AnalysisError::Unavailable` when the manager is stopped or stopping
    /// - `AnalysisError::Llm` with the upstream error, unchanged
    /// - `AnalysisError::EmptyResponse` when the model produced no text
    pub async fn get_response(&self, prompt: impl Into<String>) -> Result<String, AnalysisError> {
        let response = self
            .manager
            .submit_and_wait(prompt)
            .await
            .map_err(map_wait_error)?;

        match response.content() {
            Some(text) => Ok(text.to_string()),
            None => {
                debug!(
                    model = %response.model,
                    finish_reason = ?response.finish_reason,
                    "Model returned an empty response"
                );
                Err(AnalysisError::EmptyResponse)
            }
        }
    }

    /// Submits `prompt` without waiting.
    ///
    /// The handle resolves with the raw manager result; no timeout applies.
    pub fn get_response_async(&self, prompt: impl Into<String>) -> ResponseHandle {
        self.manager.submit(prompt)
    }

    /// The manager this client submits to.
    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }
}

fn map_wait_error(err: WaitError) -> AnalysisError {
    match err {
        WaitError::Timeout(after) => AnalysisError::QueueTimeout(after),
        WaitError::Request(err) => map_request_error(err),
    }
}

fn map_request_error(err: RequestError) -> AnalysisError {
    match err {
        RequestError::QueueFull { capacity } => AnalysisError::QueueFull { capacity },
        RequestError::Llm(err) => AnalysisError::Llm(err),
        other @ (RequestError::NotRunning
        | RequestError::ShuttingDown
        | RequestError::Abandoned) => AnalysisError::Unavailable(other),
    }
}
