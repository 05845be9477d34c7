//! GitHub App authentication types and the installation credential lifecycle.
//!
//! This module provides:
//! - ID types (`GitHubAppId`, `InstallationId`) and the process-wide [`Identity`]
//! - The signing key holder ([`SigningKey`]) and assertion minting ([`jwt`])
//! - The installation token exchange ([`exchange`])
//! - The single-flight [`CredentialCache`] that hands out bearer tokens

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ValidationError;

pub mod cache;
pub mod clock;
pub mod exchange;
pub mod jwt;
pub mod key;

pub use cache::{CacheConfig, CredentialCache, TokenSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use exchange::{ExchangeConfig, GitHubTokenExchanger, TokenExchanger};
pub use jwt::{Assertion, AssertionClaims, AssertionMinter, Rs256AssertionMinter};
pub use key::SigningKey;

// ============================================================================
// Core ID Types
// ============================================================================

/// GitHub App identifier assigned during app registration.
///
/// Used as the issuer of every assertion minted for the app.
///
/// # Examples
///
/// ```
/// use github_app_auth::auth::GitHubAppId;
///
/// let app_id = GitHubAppId::new(123456);
/// assert_eq!(app_id.as_u64(), 123456);
/// assert_eq!(app_id.to_string(), "123456");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitHubAppId(u64);

impl GitHubAppId {
    /// Create a new GitHub App ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GitHubAppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GitHubAppId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "github_app_id".to_string(),
                message: "must be a positive integer".to_string(),
            })?;
        Ok(Self::new(id))
    }
}

/// GitHub App installation identifier for a specific account.
///
/// Installation tokens are always scoped to exactly one installation.
///
/// # Examples
///
/// ```
/// use github_app_auth::auth::InstallationId;
///
/// let installation = InstallationId::new(98765);
/// assert_eq!(installation.as_u64(), 98765);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    /// Create a new installation ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidFormat {
                field: "installation_id".to_string(),
                message: "must be a positive integer".to_string(),
            })?;
        Ok(Self::new(id))
    }
}

// ============================================================================
// Identity
// ============================================================================

/// The App identity the process authenticates as.
///
/// Supplied once at startup and never mutated. Cloning is cheap; the signing
/// key is shared.
#[derive(Clone)]
pub struct Identity {
    app_id: GitHubAppId,
    installation_id: InstallationId,
    signing_key: SigningKey,
}

impl Identity {
    /// Create a new identity.
    pub fn new(
        app_id: GitHubAppId,
        installation_id: InstallationId,
        signing_key: SigningKey,
    ) -> Self {
        Self {
            app_id,
            installation_id,
            signing_key,
        }
    }

    /// Get the GitHub App ID.
    pub fn app_id(&self) -> GitHubAppId {
        self.app_id
    }

    /// Get the installation ID tokens are requested for.
    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    /// Get the signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("app_id", &self.app_id)
            .field("installation_id", &self.installation_id)
            .field("signing_key", &self.signing_key)
            .finish()
    }
}

// ============================================================================
// Token Types
// ============================================================================

/// An installation access token as handed out to callers.
///
/// The value is never exposed in Debug or Display output. Use
/// [`AccessToken::expose`] to place it in an `Authorization` header.
///
/// # Examples
///
/// ```
/// use github_app_auth::auth::AccessToken;
///
/// let token = AccessToken::new("ghs_secret".to_string());
/// assert_eq!(token.expose(), "ghs_secret");
/// assert!(!format!("{:?}", token).contains("ghs_secret"));
/// assert!(!token.to_string().contains("ghs_secret"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token value.
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Get the raw token value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length of the token in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// Whether the token is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AccessToken").field(&"<REDACTED>").finish()
    }
}

impl std::fmt::Display for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<REDACTED>")
    }
}

/// An installation token together with its lifetime.
///
/// Produced by a [`TokenExchanger`] and owned by the [`CredentialCache`].
#[derive(Clone)]
pub struct CachedToken {
    value: AccessToken,
    expires_at: DateTime<Utc>,
    fetched_at: DateTime<Utc>,
    permissions: Option<serde_json::Value>,
    repository_selection: Option<String>,
}

impl CachedToken {
    /// Create a new cached token.
    ///
    /// # Arguments
    ///
    /// * `value` - The token string from GitHub API
    /// * `expires_at` - When GitHub says the token expires (typically 1 hour)
    /// * `fetched_at` - When the token was received
    pub fn new(value: String, expires_at: DateTime<Utc>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value: AccessToken::new(value),
            expires_at,
            fetched_at,
            permissions: None,
            repository_selection: None,
        }
    }

    /// Attach the permission set GitHub reported for the token.
    pub fn with_permissions(mut self, permissions: serde_json::Value) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Attach the repository selection GitHub reported for the token.
    pub fn with_repository_selection(mut self, selection: impl Into<String>) -> Self {
        self.repository_selection = Some(selection.into());
        self
    }

    /// Get the token value.
    pub fn value(&self) -> &AccessToken {
        &self.value
    }

    /// Get when this token expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Get when this token was fetched.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Permissions granted to the token, as reported by GitHub.
    pub fn permissions(&self) -> Option<&serde_json::Value> {
        self.permissions.as_ref()
    }

    /// Repository selection (`all` or `selected`), as reported by GitHub.
    pub fn repository_selection(&self) -> Option<&str> {
        self.repository_selection.as_deref()
    }

    /// Time remaining until expiry, measured from `now`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the token may still be handed out at `now` given a refresh skew.
    ///
    /// Fresh means strictly more than `skew` of lifetime remains.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.remaining_at(now) > skew
    }
}

// Security: Redact token in debug output
impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .field("fetched_at", &self.fetched_at)
            .field("repository_selection", &self.repository_selection)
            .field("value", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
