//! Installation token exchange.
//!
//! One call to `POST /app/installations/{installation_id}/access_tokens`,
//! authenticated with an app assertion, returns an installation token and its
//! expiry. No retries happen here; retry policy belongs to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Assertion, CachedToken, Clock, InstallationId, SystemClock};
use crate::error::AuthError;

/// Media type GitHub recommends for REST requests.
pub const GITHUB_JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

/// REST API version pinned on every request.
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Exchanges an app assertion for an installation token.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Perform exactly one exchange round trip.
    ///
    /// # Errors
    ///
    /// - `AuthError::NetworkError` on transport failure
    /// - `AuthError::AuthRejected` when GitHub refuses the assertion
    /// - `AuthError::MalformedResponse` when no usable token/expiry comes back
    async fn exchange(
        &self,
        assertion: &Assertion,
        installation_id: InstallationId,
    ) -> Result<CachedToken, AuthError>;
}

/// Configuration for the token endpoint.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// GitHub API base URL (GitHub Enterprise uses `https://host/api/v3`)
    pub api_url: String,
    /// User agent for GitHub API requests (required by GitHub)
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            user_agent: concat!("github-app-auth/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ExchangeConfig {
    /// Set the GitHub API base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: Option<String>,
    expires_at: Option<String>,
    #[serde(default)]
    permissions: Option<serde_json::Value>,
    #[serde(default)]
    repository_selection: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorBody {
    message: String,
}

/// Token exchanger talking to the GitHub REST API.
pub struct GitHubTokenExchanger {
    http_client: reqwest::Client,
    config: ExchangeConfig,
    clock: Arc<dyn Clock>,
}

impl GitHubTokenExchanger {
    /// Create an exchanger for the configured API endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NetworkError` if the HTTP client cannot be created.
    pub fn new(config: ExchangeConfig) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| AuthError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` to stamp `fetched_at` and to sanity-check expiries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the exchanger configuration.
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    fn token_url(&self, installation_id: InstallationId) -> String {
        format!(
            "{}/app/installations/{}/access_tokens",
            self.config.api_url.trim_end_matches('/'),
            installation_id.as_u64()
        )
    }

    fn parse_token(&self, body: &str) -> Result<CachedToken, AuthError> {
        let response: AccessTokenResponse =
            serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse {
                message: format!("Failed to parse token response: {}", e),
            })?;

        let value = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse {
                message: "response does not contain a token".to_string(),
            })?;

        let raw_expiry = response
            .expires_at
            .ok_or_else(|| AuthError::MalformedResponse {
                message: "response does not contain expires_at".to_string(),
            })?;

        let expires_at = DateTime::parse_from_rfc3339(&raw_expiry)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AuthError::MalformedResponse {
                message: format!("expires_at '{}' is not RFC 3339: {}", raw_expiry, e),
            })?;

        let fetched_at = self.clock.now();
        if expires_at <= fetched_at {
            return Err(AuthError::MalformedResponse {
                message: format!("expires_at {} is not in the future", expires_at),
            });
        }

        let mut token = CachedToken::new(value, expires_at, fetched_at);
        if let Some(permissions) = response.permissions {
            token = token.with_permissions(permissions);
        }
        if let Some(selection) = response.repository_selection {
            token = token.with_repository_selection(selection);
        }

        Ok(token)
    }
}

#[async_trait]
impl TokenExchanger for GitHubTokenExchanger {
    async fn exchange(
        &self,
        assertion: &Assertion,
        installation_id: InstallationId,
    ) -> Result<CachedToken, AuthError> {
        let url = self.token_url(installation_id);
        debug!(installation_id = %installation_id, "Requesting installation access token");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(assertion.token())
            .header("Accept", GITHUB_JSON_MEDIA_TYPE)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::NetworkError(format!("Failed to read token response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GitHubErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body);

            warn!(
                installation_id = %installation_id,
                status = status.as_u16(),
                "Token endpoint refused the request"
            );

            return Err(match status.as_u16() {
                401 | 403 | 404 => AuthError::AuthRejected {
                    installation_id,
                    status: status.as_u16(),
                    message,
                },
                other => AuthError::UnexpectedStatus {
                    status: other,
                    message,
                },
            });
        }

        self.parse_token(&body)
    }
}

impl std::fmt::Debug for GitHubTokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubTokenExchanger")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
#[path = "exchange_tests.rs"]
mod tests;
