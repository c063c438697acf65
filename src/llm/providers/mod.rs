//! LLM provider implementations.
//!
//! Each provider implements [`LlmProvider`] for one upstream API and ships a
//! matching [`ClientFactory`](super::ClientFactory) so credentials can be
//! turned into clients at startup.

pub mod gemini;

pub use gemini::{GeminiClient, GeminiClientFactory, GEMINI_BASE_URL};

// Re-export the main LlmProvider trait for convenience
pub use super::provider::LlmProvider;
