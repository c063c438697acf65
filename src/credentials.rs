//! Credential pool and startup verification.
//!
//! A [`Credential`] is one API key (one quota unit) for the upstream service.
//! At startup every configured credential is turned into a client through a
//! [`ClientFactory`] and proven usable with one real [`LlmProvider::verify`]
//! call. Credentials that fail are logged and dropped; if none survive,
//! startup fails with [`CredentialError::NoUsableCredentials`].

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{ClientFactory, LlmProvider};

/// Mask an API key for logs: first and last four characters only.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// One configured API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Stable identifier used in logs, metrics and errors.
    pub id: String,
    /// Human-readable name.
    #[serde(default, alias = "name")]
    pub display_name: String,
    /// Secret API key. Blank keys make the credential invalid.
    #[serde(default)]
    pub api_key: String,
    /// Model override for calls made with this credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Credential {
    /// Creates a credential without a model override.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            api_key: api_key.into(),
            model: None,
        }
    }

    /// Sets the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Returns true if the API key is non-blank.
    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Model to call with this credential, falling back to `default_model`.
    pub fn model_or<'a>(&'a self, default_model: &'a str) -> &'a str {
        match self.model.as_deref() {
            Some(model) if !model.trim().is_empty() => model,
            _ => default_model,
        }
    }

    /// Masked form of the API key for diagnostics.
    pub fn masked_key(&self) -> String {
        mask_api_key(&self.api_key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("api_key", &self.masked_key())
            .field("model", &self.model)
            .finish()
    }
}

/// A credential whose client passed verification.
#[derive(Clone)]
pub struct VerifiedClient {
    /// The credential the client is bound to.
    pub credential: Credential,
    /// Client handle used for every call made with this credential.
    pub client: Arc<dyn LlmProvider>,
}

impl VerifiedClient {
    /// Pairs a credential with its client.
    pub fn new(credential: Credential, client: Arc<dyn LlmProvider>) -> Self {
        Self { credential, client }
    }
}

impl fmt::Debug for VerifiedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClient")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

/// Why a single credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFailure {
    /// Identifier of the rejected credential.
    pub id: String,
    /// Failure message from construction or verification.
    pub reason: String,
}

impl fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.reason)
    }
}

/// Errors raised while building the credential pool.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No credential survived verification.
    #[error("No usable credentials ({})", describe_failures(.failures))]
    NoUsableCredentials { failures: Vec<CredentialFailure> },
}

fn describe_failures(failures: &[CredentialFailure]) -> String {
    if failures.is_empty() {
        return "no credentials configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a verification pass that found at least one usable credential.
#[derive(Debug)]
pub struct VerificationReport {
    /// Verified clients, in configuration order.
    pub verified: Vec<VerifiedClient>,
    /// Credentials that were dropped.
    pub rejected: Vec<CredentialFailure>,
}

/// Verifies configured credentials against the upstream API.
pub struct CredentialVerifier {
    factory: Arc<dyn ClientFactory>,
}

impl CredentialVerifier {
    /// Creates a verifier that builds clients with `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Verifies every credential and returns the usable subset in order.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NoUsableCredentials` listing every rejected
    /// credential if none pass.
    pub async fn verify_all(
        &self,
        credentials: &[Credential],
    ) -> Result<Vec<VerifiedClient>, CredentialError> {
        self.verify_with_report(credentials)
            .await
            .map(|report| report.verified)
    }

    /// Like [`verify_all`](Self::verify_all) but also returns the rejected credentials.
    pub async fn verify_with_report(
        &self,
        credentials: &[Credential],
    ) -> Result<VerificationReport, CredentialError> {
        let mut rejected = Vec::new();
        let mut candidates = Vec::new();

        for credential in credentials {
            if !credential.is_valid() {
                warn!(credential_id = %credential.id, "Skipping credential with blank API key");
                rejected.push(CredentialFailure {
                    id: credential.id.clone(),
                    reason: "blank API key".to_string(),
                });
                continue;
            }

            match self.factory.create(credential) {
                Ok(client) => candidates.push(VerifiedClient::new(credential.clone(), client)),
                Err(e) => {
                    warn!(
                        credential_id = %credential.id,
                        error = %e,
                        "Failed to construct client for credential"
                    );
                    rejected.push(CredentialFailure {
                        id: credential.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // join_all yields results in input order.
        let outcomes = join_all(candidates.iter().map(|c| c.client.verify())).await;

        let mut verified = Vec::with_capacity(candidates.len());
        for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    info!(
                        credential_id = %candidate.credential.id,
                        api_key = %candidate.credential.masked_key(),
                        "Credential verified"
                    );
                    verified.push(candidate);
                }
                Err(e) => {
                    warn!(
                        credential_id = %candidate.credential.id,
                        error = %e,
                        "Credential failed verification, dropping it"
                    );
                    rejected.push(CredentialFailure {
                        id: candidate.credential.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if verified.is_empty() {
            // Report failures in configuration order.
            rejected.sort_by_key(|failure| {
                credentials
                    .iter()
                    .position(|c| c.id == failure.id)
                    .unwrap_or(usize::MAX)
            });
            return Err(CredentialError::NoUsableCredentials { failures: rejected });
        }

        info!(
            verified = verified.len(),
            rejected = rejected.len(),
            "Credential verification complete"
        );

        Ok(VerificationReport { verified, rejected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{GenerationRequest, GenerationResponse};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct StaticProvider {
        healthy: bool,
    }

    #[async_trait]
    impl LlmProvider for StaticProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::RequestFailed("not used".to_string()))
        }

        async fn verify(&self) -> Result<(), LlmError> {
            if self.healthy {
                Ok(())
            } else {
                Err(LlmError::ApiError {
                    code: 400,
                    message: "API key not valid".to_string(),
                })
            }
        }
    }

    /// Factory that fails verification for the listed credential ids.
    struct SelectiveFactory {
        bad_ids: HashSet<String>,
    }

    impl SelectiveFactory {
        fn new(bad_ids: &[&str]) -> Self {
            Self {
                bad_ids: bad_ids.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl ClientFactory for SelectiveFactory {
        fn create(&self, credential: &Credential) -> Result<Arc<dyn LlmProvider>, LlmError> {
            Ok(Arc::new(StaticProvider {
                healthy: !self.bad_ids.contains(&credential.id),
            }))
        }
    }

    fn credentials(ids: &[&str]) -> Vec<Credential> {
        ids.iter()
            .map(|id| Credential::new(*id, format!("Key {}", id), format!("secret-{}-abcdef", id)))
            .collect()
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("abc"), "***");
        assert_eq!(mask_api_key("AIzaSyD-1234567890"), "AIza...7890");
    }

    #[test]
    fn test_credential_validity() {
        assert!(Credential::new("a", "A", "key").is_valid());
        assert!(!Credential::new("b", "B", "").is_valid());
        assert!(!Credential::new("c", "C", "  \t").is_valid());
    }

    #[test]
    fn test_credential_model_fallback() {
        let plain = Credential::new("a", "A", "key");
        assert_eq!(plain.model_or("gemini-2.0-flash"), "gemini-2.0-flash");

        let pinned = plain.clone().with_model("gemini-1.5-pro");
        assert_eq!(pinned.model_or("gemini-2.0-flash"), "gemini-1.5-pro");

        let blank = plain.with_model(" ");
        assert_eq!(blank.model_or("gemini-2.0-flash"), "gemini-2.0-flash");
    }

    #[test]
    fn test_credential_debug_masks_key() {
        let credential = Credential::new("a", "A", "super-secret-value");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("supe...alue"));
    }

    #[test]
    fn test_credential_accepts_name_alias() {
        let credential: Credential =
            serde_yaml::from_str("id: k1\nname: Primary\napi_key: abc\n").expect("yaml");
        assert_eq!(credential.display_name, "Primary");
        assert_eq!(credential.model, None);
    }

    #[tokio::test]
    async fn test_verify_all_keeps_passing_subset_in_order() {
        let verifier = CredentialVerifier::new(Arc::new(SelectiveFactory::new(&["k2", "k4"])));
        let verified = verifier
            .verify_all(&credentials(&["k1", "k2", "k3", "k4", "k5"]))
            .await
            .expect("subset should verify");

        let ids: Vec<&str> = verified.iter().map(|v| v.credential.id.as_str()).collect();
        assert_eq!(ids, vec!["k1", "k3", "k5"]);
    }

    #[tokio::test]
    async fn test_verify_skips_blank_keys() {
        let mut list = credentials(&["k1", "k2"]);
        list[0].api_key = "   ".to_string();

        let verifier = CredentialVerifier::new(Arc::new(SelectiveFactory::new(&[])));
        let report = verifier
            .verify_with_report(&list)
            .await
            .expect("one credential is usable");

        assert_eq!(report.verified.len(), 1);
        assert_eq!(report.verified[0].credential.id, "k2");
        assert_eq!(report.rejected[0].id, "k1");
        assert_eq!(report.rejected[0].reason, "blank API key");
    }

    #[tokio::test]
    async fn test_verify_all_fails_listing_every_credential() {
        let mut list = credentials(&["k1", "k2", "k3"]);
        list[1].api_key = String::new();

        let verifier = CredentialVerifier::new(Arc::new(SelectiveFactory::new(&["k1", "k3"])));
        let err = verifier.verify_all(&list).await.unwrap_err();

        let CredentialError::NoUsableCredentials { failures } = &err;
        let ids: Vec<&str> = failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["k1", "k2", "k3"]);

        let message = err.to_string();
        assert!(message.contains("k1: API error (400): API key not valid"));
        assert!(message.contains("k2: blank API key"));
        assert!(message.contains("k3"));
    }

    #[tokio::test]
    async fn test_verify_all_empty_list() {
        let verifier = CredentialVerifier::new(Arc::new(SelectiveFactory::new(&[])));
        let err = verifier.verify_all(&[]).await.unwrap_err();
        assert!(err.to_string().contains("no credentials configured"));
    }
}
