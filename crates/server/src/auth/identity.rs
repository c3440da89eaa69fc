//! Identity provider client.
//!
//! Verifies a bearer token against a Supabase-style auth endpoint
//! (`GET {base}/auth/v1/user`) and extracts the caller's user id plus the
//! tenant claim from the returned metadata.

use std::sync::Arc;

use agenda_core::{TenantId, UserId};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::instrument;

use crate::config::IdentityConfig;

/// Errors returned by an identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider rejected the token.
    #[error("token rejected by identity provider")]
    InvalidToken,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an unexpected status or body.
    #[error("identity provider error: {0}")]
    Upstream(String),
}

/// The verified caller behind a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    /// Tenant carried by the token's claims, if any.
    pub tenant_id: Option<TenantId>,
}

/// Verifies bearer tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a token into the identity it was issued to.
    async fn resolve_identity(&self, token: &str) -> Result<Identity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    app_metadata: Map<String, Value>,
    #[serde(default)]
    user_metadata: Map<String, Value>,
}

impl UserResponse {
    /// The claim from `app_metadata`, else from `user_metadata`.
    fn tenant_claim(&self, claim: &str) -> Option<TenantId> {
        [&self.app_metadata, &self.user_metadata]
            .into_iter()
            .find_map(|metadata| claim_value(metadata.get(claim)?))
            .map(TenantId::new)
    }
}

fn claim_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HTTP client for a Supabase-compatible auth API.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    inner: Arc<HttpIdentityProviderInner>,
}

struct HttpIdentityProviderInner {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    tenant_claim: String,
}

impl HttpIdentityProvider {
    /// Create a new identity provider client sharing `client`.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &IdentityConfig) -> Self {
        let endpoint = format!(
            "{}/auth/v1/user",
            config.base_url.as_str().trim_end_matches('/')
        );

        Self {
            inner: Arc::new(HttpIdentityProviderInner {
                client,
                endpoint,
                api_key: config.api_key.clone(),
                tenant_claim: config.tenant_claim.clone(),
            }),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all)]
    async fn resolve_identity(&self, token: &str) -> Result<Identity, IdentityError> {
        let response = self
            .inner
            .client
            .get(&self.inner.endpoint)
            .header("apikey", self.inner.api_key.expose_secret())
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(IdentityError::InvalidToken);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %text.chars().take(500).collect::<String>(),
                "Identity provider returned non-success status"
            );
            return Err(IdentityError::Upstream(format!("HTTP {status}")));
        }

        let user: UserResponse = response.json().await?;
        if user.id.trim().is_empty() {
            return Err(IdentityError::Upstream("user without id".to_string()));
        }

        let tenant_id = user.tenant_claim(&self.inner.tenant_claim);
        tracing::debug!(user_id = %user.id, has_tenant_claim = tenant_id.is_some(), "Token verified");

        Ok(Identity {
            user_id: UserId::new(user.id),
            tenant_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn user(json: Value) -> UserResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_app_metadata_takes_precedence() {
        let user = user(serde_json::json!({
            "id": "u1",
            "app_metadata": {"client_id": "t1"},
            "user_metadata": {"client_id": "t2"}
        }));
        assert_eq!(user.tenant_claim("client_id"), Some(TenantId::new("t1")));
    }

    #[test]
    fn test_falls_back_to_user_metadata() {
        let user = user(serde_json::json!({
            "id": "u1",
            "app_metadata": {"provider": "email"},
            "user_metadata": {"client_id": " t2 "}
        }));
        assert_eq!(user.tenant_claim("client_id"), Some(TenantId::new("t2")));
    }

    #[test]
    fn test_numeric_claim_is_accepted() {
        let user = user(serde_json::json!({"id": "u1", "app_metadata": {"client_id": 42}}));
        assert_eq!(user.tenant_claim("client_id"), Some(TenantId::new("42")));
    }

    #[test]
    fn test_blank_or_missing_claim_is_none() {
        let user = user(serde_json::json!({
            "id": "u1",
            "app_metadata": {"client_id": "  "},
        }));
        assert_eq!(user.tenant_claim("client_id"), None);
        assert_eq!(user.tenant_claim("other"), None);
    }
}
