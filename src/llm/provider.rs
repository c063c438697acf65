//! Provider-neutral request/response types and the client traits.
//!
//! The queue core only ever talks to the external service through
//! [`LlmProvider`]: one `generate` call per request and one `verify` call per
//! credential at startup. [`ClientFactory`] builds a provider for a credential.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::error::LlmError;

/// Default model used when a credential does not override it.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Static generation settings applied to every call.
///
/// Loaded once with the rest of the configuration and never re-validated per
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Model name used when a credential has no model override.
    pub model: String,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum number of tokens the model may generate.
    pub max_output_tokens: u32,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_output_tokens: 8192,
            top_p: None,
            top_k: None,
        }
    }
}

/// A single text-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation.
    pub model: String,
    /// Prompt text sent as a single user turn.
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: None,
            max_output_tokens: None,
            top_p: None,
            top_k: None,
        }
    }

    /// Build a request carrying every setting from `config`.
    pub fn from_config(
        model: impl Into<String>,
        prompt: impl Into<String>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: Some(config.temperature),
            max_output_tokens: Some(config.max_output_tokens),
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max output tokens for this request.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Token usage reported by the upstream API.
///
/// Every field defaults to zero when the response omits it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// Response from a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Model that produced the response.
    pub model: String,
    /// Generated text (concatenated parts of the first candidate).
    pub text: String,
    /// Reason generation stopped, when reported.
    pub finish_reason: Option<String>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Returns the generated text, or `None` if the model produced nothing.
    pub fn content(&self) -> Option<&str> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;

    /// Issue one lightweight call proving the client is usable.
    async fn verify(&self) -> Result<(), LlmError>;
}

/// Builds one provider per credential.
pub trait ClientFactory: Send + Sync {
    /// Construct a client bound to `credential`.
    fn create(&self, credential: &Credential) -> Result<Arc<dyn LlmProvider>, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("gemini-2.0-flash", "summarize")
            .with_temperature(0.2)
            .with_max_output_tokens(512);

        assert_eq!(request.model, "gemini-2.0-flash");
        assert_eq!(request.prompt, "summarize");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_output_tokens, Some(512));
        assert_eq!(request.top_p, None);
    }

    #[test]
    fn test_request_from_config_copies_settings() {
        let config = GenerationConfig {
            top_p: Some(0.9),
            top_k: Some(32),
            ..Default::default()
        };

        let request = GenerationRequest::from_config("model-a", "prompt", &config);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_output_tokens, Some(8192));
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.top_k, Some(32));
    }

    #[test]
    fn test_response_content() {
        let mut response = GenerationResponse {
            model: "gemini-2.0-flash".to_string(),
            text: "Revenue grew 12%".to_string(),
            finish_reason: Some("STOP".to_string()),
            usage: Usage::default(),
        };
        assert_eq!(response.content(), Some("Revenue grew 12%"));

        response.text = "  \n".to_string();
        assert_eq!(response.content(), None);
    }

    #[test]
    fn test_generation_config_partial_yaml() {
        let config: GenerationConfig =
            serde_yaml::from_str("temperature: 0.1\n").expect("yaml should parse");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!((config.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.max_output_tokens, 8192);
    }
}
