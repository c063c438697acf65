//! insight-queue: bounded request queue and worker pool for Gemini calls.
//!
//! A fixed pool of workers, each bound to one verified API key, drains a
//! bounded FIFO of prompts. Callers submit through [`QueueManager`] or the
//! [`AnalysisClient`] adapter and get back a handle that always resolves:
//! with the response, a queue-full rejection, an upstream error, or a
//! shutdown cancellation.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use analysis::AnalysisClient;
pub use config::{AppConfig, ConfigError};
pub use credentials::{Credential, CredentialError, CredentialVerifier, VerifiedClient};
pub use error::{AnalysisError, ErrorCode, LlmError};
pub use scheduler::{
    ManagerError, QueueConfig, QueueManager, RequestError, ResponseHandle, ShutdownReport,
    WaitError,
};
