//! LLM integration for insight-queue.
//!
//! The queue core depends only on the [`LlmProvider`] and [`ClientFactory`]
//! traits. Concrete upstream APIs live under [`providers`].
//!
//! ```ignore
//! use insight_queue::llm::{GeminiClient, GenerationRequest, LlmProvider};
//!
//! let client = GeminiClient::new(std::env::var("GEMINI_API_KEY")?)?;
//! client.verify().await?;
//!
//! let request = GenerationRequest::new("gemini-2.0-flash", "Summarize these sales figures")
//!     .with_temperature(0.2);
//! let response = client.generate(request).await?;
//! println!("{}", response.text);
//! ```

pub mod provider;
pub mod providers;

pub use provider::{
    ClientFactory, GenerationConfig, GenerationRequest, GenerationResponse, LlmProvider, Usage,
    DEFAULT_MODEL,
};
pub use providers::{GeminiClient, GeminiClientFactory, GEMINI_BASE_URL};
