//! Application configuration.
//!
//! Configuration is loaded once, from a YAML file and/or environment
//! variables, and passed into the queue manager at construction. Nothing
//! reads it globally afterwards.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::Credential;
use crate::llm::providers::gemini::REQUEST_TIMEOUT_SECS;
use crate::llm::{ClientFactory, GeminiClientFactory, GenerationConfig, GEMINI_BASE_URL};
use crate::scheduler::config::{
    QueueConfig, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WORKER_COUNT,
};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A setting has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Connection settings for the Gemini API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API base URL.
    pub base_url: String,
    /// Per-call HTTP timeout in seconds.
    pub http_timeout_seconds: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            http_timeout_seconds: REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Maximum number of queued requests.
    pub queue_capacity: usize,
    /// How long a blocking submission waits, in seconds.
    pub request_timeout_seconds: u64,
    /// How long shutdown waits for workers, in seconds.
    pub shutdown_timeout_seconds: u64,
    /// Worker poll bound, in milliseconds.
    pub poll_interval_millis: u64,
    /// Static generation settings.
    pub generation: GenerationConfig,
    /// Upstream API settings.
    pub gemini: GeminiConfig,
    /// Configured API keys.
    pub credentials: Vec<Credential>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            shutdown_timeout_seconds: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
            poll_interval_millis: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            generation: GenerationConfig::default(),
            gemini: GeminiConfig::default(),
            credentials: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Reads configuration from a YAML file.
    ///
    /// Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Yaml` if it does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Creates configuration from defaults plus environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `INSIGHT_WORKER_COUNT`: Number of workers (default: 10)
    /// - `INSIGHT_QUEUE_CAPACITY`: Queue capacity (default: 100)
    /// - `INSIGHT_REQUEST_TIMEOUT_SECS`: Blocking submission timeout (default: 60)
    /// - `INSIGHT_SHUTDOWN_TIMEOUT_SECS`: Shutdown drain timeout (default: 30)
    /// - `INSIGHT_POLL_INTERVAL_MS`: Worker poll bound (default: 1000)
    /// - `GEMINI_MODEL`: Default model (default: gemini-2.0-flash)
    /// - `GEMINI_API_BASE`: API base URL
    /// - `GEMINI_API_KEYS`: Comma-separated API keys, added as `env-1`, `env-2`, ...
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GEMINI_API_KEYS` yields no
    /// credentials, and other `ConfigError`s if a variable has an invalid
    /// value or the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but resolves variables with `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        if config.credentials.is_empty() {
            return Err(ConfigError::MissingEnvVar("GEMINI_API_KEYS".to_string()));
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` with environment overrides applied on top, or falls back
    /// to [`from_env`](Self::from_env) when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Self::from_env();
        };

        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides using `lookup` to resolve variable names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("INSIGHT_WORKER_COUNT") {
            self.worker_count = parse_env_value(&val, "INSIGHT_WORKER_COUNT")?;
        }

        if let Some(val) = lookup("INSIGHT_QUEUE_CAPACITY") {
            self.queue_capacity = parse_env_value(&val, "INSIGHT_QUEUE_CAPACITY")?;
        }

        if let Some(val) = lookup("INSIGHT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_seconds = parse_env_value(&val, "INSIGHT_REQUEST_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("INSIGHT_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_seconds =
                parse_env_value(&val, "INSIGHT_SHUTDOWN_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("INSIGHT_POLL_INTERVAL_MS") {
            self.poll_interval_millis = parse_env_value(&val, "INSIGHT_POLL_INTERVAL_MS")?;
        }

        if let Some(val) = lookup("GEMINI_MODEL") {
            self.generation.model = val;
        }

        if let Some(val) = lookup("GEMINI_API_BASE") {
            self.gemini.base_url = val;
        }

        if let Some(val) = lookup("GEMINI_API_KEYS") {
            let keys = val
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty());
            for (index, key) in keys.enumerate() {
                let id = format!("env-{}", index + 1);
                let name = format!("GEMINI_API_KEYS[{}]", index);
                self.credentials.push(Credential::new(id, name, key));
            }
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue_config().validate()?;

        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "generation.model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.generation.max_output_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_output_tokens must be greater than 0".to_string(),
            ));
        }

        if self.gemini.http_timeout_seconds == 0 {
            return Err(ConfigError::ValidationFailed(
                "gemini.http_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for credential in &self.credentials {
            if !seen.insert(credential.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate credential id '{}'",
                    credential.id
                )));
            }
        }

        Ok(())
    }

    /// Queue and pool settings derived from this configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new(self.worker_count)
            .with_queue_capacity(self.queue_capacity)
            .with_request_timeout(Duration::from_secs(self.request_timeout_seconds))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_seconds))
            .with_poll_interval(Duration::from_millis(self.poll_interval_millis))
    }

    /// Client factory for the configured Gemini endpoint.
    pub fn client_factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(GeminiClientFactory::new(
            self.gemini.base_url.clone(),
            Duration::from_secs(self.gemini.http_timeout_seconds),
        ))
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
