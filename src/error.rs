//! Error types shared across insight-queue.
//!
//! Defines the errors raised by the external generative-AI client and the
//! caller-facing error kinds the analysis adapter exposes. Module-local
//! failures (queue admission, configuration, credential verification,
//! manager lifecycle) live next to the code that raises them.

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::RequestError;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key for credential '{0}'")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientInit(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Prompt blocked by the model: {0}")]
    ContentBlocked(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Returns true if the upstream service rejected the call for quota reasons.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }
}

/// Stable error codes surfaced to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The caller gave up waiting for a queued request.
    QueueTimeout,
    /// The request queue was at capacity.
    QueueFull,
    /// The upstream API rejected the call for quota reasons.
    RateLimited,
    /// The queue manager is not accepting or finishing work.
    ServiceUnavailable,
    /// Any other upstream failure.
    UpstreamError,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::QueueTimeout => "QUEUE_TIMEOUT",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
        }
    }

    /// Suggested HTTP status for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::QueueTimeout => 504,
            ErrorCode::QueueFull => 503,
            ErrorCode::RateLimited => 429,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::UpstreamError => 502,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the analysis adapter to orchestration code.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Timed out after {0:?} waiting for an analysis response")]
    QueueTimeout(Duration),

    #[error("Analysis queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Analysis service unavailable: {0}")]
    Unavailable(RequestError),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AnalysisError {
    /// Classifies this error into a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            AnalysisError::QueueTimeout(_) => ErrorCode::QueueTimeout,
            AnalysisError::QueueFull { .. } => ErrorCode::QueueFull,
            AnalysisError::Unavailable(_) => ErrorCode::ServiceUnavailable,
            AnalysisError::EmptyResponse => ErrorCode::UpstreamError,
            AnalysisError::Llm(err) if err.is_rate_limited() => ErrorCode::RateLimited,
            AnalysisError::Llm(_) => ErrorCode::UpstreamError,
        }
    }
}
