//! Google Gemini provider.
//!
//! Talks to the Generative Language REST API (`models/{model}:generateContent`)
//! with one API key per client. Each client is owned by exactly one worker,
//! so the client itself performs no retries and no rate limiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::credentials::{mask_api_key, Credential};
use crate::error::LlmError;
use crate::llm::{ClientFactory, GenerationRequest, GenerationResponse, LlmProvider, Usage};

/// Default Generative Language API endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Gemini client bound to a single API key.
pub struct GeminiClient {
    /// HTTP client for making API requests.
    client: Client,
    /// API key sent in the `x-goog-api-key` header.
    api_key: String,
    /// Base URL for the API.
    base_url: String,
}

impl GeminiClient {
    /// Create a client against the public endpoint.
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(
            api_key,
            GEMINI_BASE_URL.to_string(),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Create a client with a custom base URL and timeout.
    ///
    /// Useful for regional endpoints, proxies and tests.
    pub fn with_base_url(
        api_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::ClientInit(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        mask_api_key(&self.api_key)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(model)
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        if request.model.trim().is_empty() {
            return Err(LlmError::InvalidModel("model name is empty".to_string()));
        }

        let api_request = ApiRequest::from(&request);
        let http_response = self
            .client
            .post(self.generate_url(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(error_from_status(status.as_u16(), &error_text));
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        into_generation_response(api_response, &request.model)
    }

    async fn verify(&self) -> Result<(), LlmError> {
        let http_response = self
            .client
            .get(format!("{}/models?pageSize=1", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = http_response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(error_from_status(status.as_u16(), &error_text))
    }
}

/// Builds [`GeminiClient`]s for configured credentials.
#[derive(Debug, Clone)]
pub struct GeminiClientFactory {
    base_url: String,
    timeout: Duration,
}

impl GeminiClientFactory {
    /// Create a factory for the given endpoint and per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

impl Default for GeminiClientFactory {
    fn default() -> Self {
        Self::new(GEMINI_BASE_URL, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }
}

impl ClientFactory for GeminiClientFactory {
    fn create(&self, credential: &Credential) -> Result<Arc<dyn LlmProvider>, LlmError> {
        if !credential.is_valid() {
            return Err(LlmError::MissingApiKey(credential.id.clone()));
        }

        let client = GeminiClient::with_base_url(
            credential.api_key.trim().to_string(),
            self.base_url.clone(),
            self.timeout,
        )?;
        Ok(Arc::new(client))
    }
}

/// Map a non-success HTTP response to an [`LlmError`].
fn error_from_status(status_code: u16, body: &str) -> LlmError {
    if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(body) {
        let detail = error_response.error;
        if status_code == 429 || detail.status.as_deref() == Some("RESOURCE_EXHAUSTED") {
            return LlmError::RateLimited(detail.message);
        }
        return LlmError::ApiError {
            code: status_code,
            message: detail.message,
        };
    }

    if status_code == 429 {
        return LlmError::RateLimited(body.to_string());
    }

    LlmError::ApiError {
        code: status_code,
        message: body.to_string(),
    }
}

fn into_generation_response(
    api_response: ApiResponse,
    requested_model: &str,
) -> Result<GenerationResponse, LlmError> {
    let usage = api_response
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count.unwrap_or(0),
            completion_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    let model = api_response
        .model_version
        .unwrap_or_else(|| requested_model.to_string());

    let Some(candidate) = api_response.candidates.into_iter().next() else {
        if let Some(reason) = api_response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(LlmError::ContentBlocked(reason));
        }
        return Err(LlmError::ParseError(
            "No candidates in Gemini response".to_string(),
        ));
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(GenerationResponse {
        model,
        text,
        finish_reason: candidate.finish_reason,
        usage,
    })
}

/// Internal request structure for `generateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    generation_config: ApiGenerationConfig,
}

impl From<&GenerationRequest> for ApiRequest {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart {
                    text: Some(request.prompt.clone()),
                }],
            }],
            generation_config: ApiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                top_p: request.top_p,
                top_k: request.top_k,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

/// Internal response structure from `generateContent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
    #[serde(default)]
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}
