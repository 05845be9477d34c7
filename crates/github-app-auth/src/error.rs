//! Error types for GitHub App authentication and API operations.
//!
//! Errors carry enough classification for callers to decide whether a retry
//! can help. Token values and key material never appear in messages.

use thiserror::Error;

use crate::auth::InstallationId;

/// Authentication-related errors with retry classification.
///
/// `AuthError` is `Clone` because a single failed refresh is delivered to
/// every caller that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The signing key could not be parsed or used (non-retryable).
    #[error("Invalid key material: {message}")]
    InvalidKeyMaterial { message: String },

    /// GitHub rejected the assertion for this installation (non-retryable).
    #[error("Installation {installation_id} rejected the app assertion: {status} - {message}")]
    AuthRejected {
        installation_id: InstallationId,
        status: u16,
        message: String,
    },

    /// An assertion failed local verification against an identity.
    #[error("Assertion rejected: {message}")]
    AssertionRejected { message: String },

    /// The token endpoint answered with an unexpected status.
    #[error("Token endpoint returned {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// The token response could not be turned into a usable token.
    #[error("Malformed token response: {message}")]
    MalformedResponse { message: String },

    /// Network connectivity or transport error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The refresh did not complete within the configured deadline.
    #[error("Token refresh timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The caller driving an in-flight refresh went away before it finished.
    #[error("Token refresh was cancelled before completion")]
    RefreshCancelled,
}

impl AuthError {
    /// Check if this error represents a transient condition that may succeed if retried.
    ///
    /// Transient errors include network failures, timeouts, cancelled refreshes,
    /// and server-side (5xx) or rate-limit (429) responses from the token endpoint.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidKeyMaterial { .. } => false,
            Self::AuthRejected { .. } => false,
            Self::AssertionRejected { .. } => false,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::MalformedResponse { .. } => false,
            Self::NetworkError(_) => true,
            Self::Timeout { .. } => true,
            Self::RefreshCancelled => true,
        }
    }
}

/// Errors during authenticated GitHub API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A bearer token could not be obtained.
    #[error("Failed to obtain installation token: {0}")]
    Auth(#[from] AuthError),

    /// GitHub rejected the request twice, once with a freshly minted token.
    #[error("Authentication failed after token refresh")]
    AuthenticationFailed,

    /// A request could not be built from its parts.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The request failed with a non-success status.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// Request to GitHub API timed out.
    #[error("Request timeout")]
    Timeout,

    /// Failed to parse JSON response from GitHub API.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error (network, TLS, etc.).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

impl ApiError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_transient(),
            Self::AuthenticationFailed => false,
            Self::InvalidRequest { .. } => false,
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            Self::Timeout => true,
            Self::JsonError(_) => false,
            Self::HttpClientError(_) => true,
        }
    }
}

/// Input validation errors.
///
/// These errors occur when validating configuration data or identifiers.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// A field has an invalid format.
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    /// A field value is out of the acceptable range.
    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
