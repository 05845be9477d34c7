//! # GitHub App Auth
//!
//! Installation credential lifecycle for GitHub Apps, plus a small set of
//! diagnostic probes that exercise the resulting credentials.
//!
//! This crate provides:
//! - RS256 app assertions minted from the app's private key
//! - Installation token exchange against the GitHub REST API
//! - A single-flight credential cache shared by concurrent callers
//! - An authenticated client that retries once after a forced refresh
//! - A probe runner with per-probe failure isolation
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use github_app_auth::auth::{
//!     CredentialCache, ExchangeConfig, GitHubAppId, GitHubTokenExchanger, Identity,
//!     InstallationId, Rs256AssertionMinter, SigningKey,
//! };
//! use github_app_auth::client::{AuthenticatedClient, ClientConfig};
//! use github_app_auth::probes::{ProbeRunner, RateLimitProbe, Probe};
//!
//! # async fn example(pem: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let identity = Identity::new(
//!     GitHubAppId::new(123456),
//!     InstallationId::new(789012),
//!     SigningKey::from_pem(pem)?,
//! );
//!
//! let cache = Arc::new(CredentialCache::new(
//!     identity,
//!     Arc::new(Rs256AssertionMinter::new()),
//!     Arc::new(GitHubTokenExchanger::new(ExchangeConfig::default())?),
//! ));
//! let client = AuthenticatedClient::new(cache, ClientConfig::default())?;
//!
//! let probes: Vec<Box<dyn Probe>> = vec![Box::new(RateLimitProbe::new())];
//! let report = ProbeRunner::new().run(&client, &probes).await;
//! println!("{} of {} probes succeeded", report.succeeded(), report.results().len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod probes;

#[cfg(test)]
mod test_keys;

pub use error::{ApiError, AuthError, ValidationError};

pub use auth::{
    AccessToken, CachedToken, CredentialCache, GitHubAppId, Identity, InstallationId, SigningKey,
};
pub use client::{ApiRequest, ApiResponse, ApiTransport, AuthenticatedClient, ClientConfig};
pub use probes::{Probe, ProbeOutcome, ProbeReport, ProbeResult, ProbeRunner};
