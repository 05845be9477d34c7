//! JWT assertion minting for GitHub App authentication.
//!
//! An assertion is a short-lived RS256 JWT identifying the App. It is presented
//! to the installation token endpoint and is never reused past its own expiry.
//!
//! # GitHub Requirements
//!
//! - JWTs must use RS256 (RSA Signature with SHA-256)
//! - Expiration may be at most 10 minutes in the future
//! - Claims must include `iss` (app ID), `iat` (issued at) and `exp` (expiration)
//!
//! `iat` is back-dated by a small skew so a client clock running slightly ahead
//! of GitHub's does not produce a token "issued in the future".

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{GitHubAppId, Identity, SigningKey};
use crate::error::{AuthError, ValidationError};

/// Upper bound on `exp - iat` for any assertion, in seconds.
pub const MAX_ASSERTION_LIFETIME_SECS: i64 = 600;

/// Default back-dating of `iat`, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

/// JWT claims for GitHub App authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer (GitHub App ID, rendered as a decimal string)
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// A signed, time-bounded assertion of the App's identity.
///
/// The encoded token is never exposed in Debug output.
#[derive(Clone)]
pub struct Assertion {
    token: String,
    claims: AssertionClaims,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Assertion {
    /// Get the encoded JWT for use as `Authorization: Bearer <token>`.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Get the claims the assertion was signed over.
    pub fn claims(&self) -> &AssertionClaims {
        &self.claims
    }

    /// Get when this assertion claims to have been issued.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Get when this assertion expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Total validity window (`exp - iat`).
    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }

    /// Check whether the assertion has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Validate this assertion against an App identity at `now`.
    ///
    /// Checks the RS256 signature with `key`, that `iss` equals `app_id`, that
    /// `iat <= now < exp`, and that the window does not exceed
    /// [`MAX_ASSERTION_LIFETIME_SECS`].
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AssertionRejected` on any mismatch.
    pub fn verify(
        &self,
        key: &SigningKey,
        app_id: GitHubAppId,
        now: DateTime<Utc>,
    ) -> Result<AssertionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["iss".to_string()]);
        validation.set_issuer(&[app_id.to_string()]);

        let decoded =
            jsonwebtoken::decode::<AssertionClaims>(&self.token, key.decoding_key(), &validation)
                .map_err(|e| AuthError::AssertionRejected {
                    message: format!("Verification failed: {}", e),
                })?;
        let claims = decoded.claims;

        if claims.exp <= claims.iat {
            return Err(AuthError::AssertionRejected {
                message: "exp must be after iat".to_string(),
            });
        }

        if claims.exp - claims.iat > MAX_ASSERTION_LIFETIME_SECS {
            return Err(AuthError::AssertionRejected {
                message: format!(
                    "validity window of {}s exceeds {}s",
                    claims.exp - claims.iat,
                    MAX_ASSERTION_LIFETIME_SECS
                ),
            });
        }

        let now = now.timestamp();
        if now < claims.iat || now >= claims.exp {
            return Err(AuthError::AssertionRejected {
                message: "current time is outside the assertion window".to_string(),
            });
        }

        Ok(claims)
    }
}

// Security: Don't expose token in debug output
impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assertion")
            .field("iss", &self.claims.iss)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// Produces a fresh assertion for an identity.
///
/// This trait abstracts assertion minting so the credential cache can be
/// exercised with deterministic minters in tests.
pub trait AssertionMinter: Send + Sync {
    /// Mint an assertion for `identity` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKeyMaterial` if the identity's key cannot sign.
    fn mint(&self, identity: &Identity, now: DateTime<Utc>) -> Result<Assertion, AuthError>;
}

/// RS256 assertion minter using the identity's RSA signing key.
///
/// # Examples
///
/// ```no_run
/// # use github_app_auth::auth::{AssertionMinter, Identity, Rs256AssertionMinter};
/// # fn example(identity: &Identity) -> Result<(), Box<dyn std::error::Error>> {
/// let minter = Rs256AssertionMinter::new();
/// let assertion = minter.mint(identity, chrono::Utc::now())?;
/// assert!(assertion.lifetime().num_seconds() <= 600);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Rs256AssertionMinter {
    lifetime: Duration,
    clock_skew: Duration,
}

impl Rs256AssertionMinter {
    /// Create a minter with a 60 second skew and the longest lifetime the
    /// 10 minute window allows.
    pub fn new() -> Self {
        Self {
            lifetime: Duration::seconds(MAX_ASSERTION_LIFETIME_SECS - DEFAULT_CLOCK_SKEW_SECS),
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
        }
    }

    /// Create a minter with a custom lifetime and skew.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfRange` if `lifetime` is not positive, if
    /// `clock_skew` is negative, or if together they exceed the 10 minute window.
    pub fn with_timing(lifetime: Duration, clock_skew: Duration) -> Result<Self, ValidationError> {
        if lifetime <= Duration::zero() {
            return Err(ValidationError::OutOfRange {
                field: "assertion_lifetime".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if clock_skew < Duration::zero() {
            return Err(ValidationError::OutOfRange {
                field: "assertion_clock_skew".to_string(),
                message: "cannot be negative".to_string(),
            });
        }

        if (lifetime + clock_skew).num_seconds() > MAX_ASSERTION_LIFETIME_SECS {
            return Err(ValidationError::OutOfRange {
                field: "assertion_lifetime".to_string(),
                message: format!(
                    "lifetime plus clock skew cannot exceed {}s (GitHub requirement)",
                    MAX_ASSERTION_LIFETIME_SECS
                ),
            });
        }

        Ok(Self {
            lifetime,
            clock_skew,
        })
    }

    /// How long after `now` minted assertions expire.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// How far before `now` minted assertions claim to be issued.
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    fn build_claims(&self, identity: &Identity, now: DateTime<Utc>) -> AssertionClaims {
        let now = now.timestamp();
        AssertionClaims {
            iss: identity.app_id().to_string(),
            iat: now - self.clock_skew.num_seconds(),
            exp: now + self.lifetime.num_seconds(),
        }
    }
}

impl Default for Rs256AssertionMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl AssertionMinter for Rs256AssertionMinter {
    fn mint(&self, identity: &Identity, now: DateTime<Utc>) -> Result<Assertion, AuthError> {
        let claims = self.build_claims(identity, now);

        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, &claims, identity.signing_key().encoding_key()).map_err(|e| {
            AuthError::InvalidKeyMaterial {
                message: format!("Failed to sign assertion: {}", e),
            }
        })?;

        // Whole-second claims map exactly onto the reported timestamps.
        let base = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
        let issued_at = base - self.clock_skew;
        let expires_at = base + self.lifetime;

        Ok(Assertion {
            token,
            claims,
            issued_at,
            expires_at,
        })
    }
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
