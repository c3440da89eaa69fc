//! Access tokens for the spreadsheet API.
//!
//! Google access tokens live for about an hour. [`RefreshingToken`] trades a
//! long-lived OAuth refresh token for fresh ones as they run out;
//! [`StaticToken`] serves a single token for deployments that rotate it
//! themselves.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::instrument;
use url::Url;

use super::MirrorError;
use crate::config::MirrorCredentials;

/// Refresh this many seconds before the provider says a token expires.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Supplies the bearer token for spreadsheet API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token believed to be valid right now.
    async fn access_token(&self) -> Result<SecretString, MirrorError>;

    /// Forget the current token after the API rejected it.
    ///
    /// Returns `false` when no other token can be obtained, so retrying is
    /// pointless.
    async fn invalidate(&self) -> bool;
}

/// Build the token source for `credentials`.
#[must_use]
pub fn token_source(client: reqwest::Client, credentials: &MirrorCredentials) -> Box<dyn TokenSource> {
    match credentials {
        MirrorCredentials::AccessToken(token) => Box::new(StaticToken(token.clone())),
        MirrorCredentials::RefreshToken {
            token_url,
            client_id,
            client_secret,
            refresh_token,
        } => Box::new(RefreshingToken {
            client,
            token_url: token_url.clone(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            refresh_token: refresh_token.clone(),
            cached: RwLock::new(None),
        }),
    }
}

/// A fixed token.
pub struct StaticToken(SecretString);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<SecretString, MirrorError> {
        Ok(self.0.clone())
    }

    async fn invalidate(&self) -> bool {
        false
    }
}

/// Access token minted from an OAuth refresh token and cached until shortly
/// before it expires.
pub struct RefreshingToken {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    cached: RwLock<Option<AccessToken>>,
}

struct AccessToken {
    value: SecretString,
    /// Unix timestamp when the token expires.
    expires_at: i64,
}

impl AccessToken {
    fn expires_within(&self, seconds: i64) -> bool {
        chrono::Utc::now().timestamp() + seconds >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: i64,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl RefreshingToken {
    #[instrument(skip(self), fields(token_url = %self.token_url))]
    async fn refresh(&self) -> Result<AccessToken, MirrorError> {
        let now = chrono::Utc::now().timestamp();

        let response = self
            .client
            .post(self.token_url.as_str())
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", self.refresh_token.expose_secret()),
            ])
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            let message = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(MirrorError::Unauthorized(message));
        }

        let body: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = body.expires_in, "Refreshed mirror access token");

        Ok(AccessToken {
            value: SecretString::from(body.access_token),
            expires_at: now + body.expires_in,
        })
    }
}

#[async_trait]
impl TokenSource for RefreshingToken {
    async fn access_token(&self) -> Result<SecretString, MirrorError> {
        if let Some(token) = self.cached.read().await.as_ref()
            && !token.expires_within(REFRESH_MARGIN_SECS)
        {
            return Ok(token.value.clone());
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref()
            && !token.expires_within(REFRESH_MARGIN_SECS)
        {
            return Ok(token.value.clone());
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate(&self) -> bool {
        *self.cached.write().await = None;
        true
    }
}
