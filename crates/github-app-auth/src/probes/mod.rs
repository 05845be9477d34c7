//! Diagnostic probes against the GitHub REST API.
//!
//! A [`Probe`] is one independent API call whose outcome is recorded as a
//! [`ProbeResult`]. The [`ProbeRunner`] executes probes in order and contains
//! every failure inside that probe's result, so one broken endpoint never
//! hides the state of the others.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::client::ApiTransport;
use crate::error::ApiError;

pub mod github;

pub use github::{
    list_installation_repositories, DownloadContentsProbe, GetContentsProbe, ListCommitsProbe,
    RateLimitProbe, RepositoryRef, RepositorySummary,
};

/// What a probe observed when it got a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// HTTP status of the probed call
    pub status_code: u16,
    /// Human-readable summary of the response
    pub detail: String,
}

impl ProbeOutcome {
    pub fn new(status_code: u16, detail: impl Into<String>) -> Self {
        Self {
            status_code,
            detail: detail.into(),
        }
    }
}

/// A named diagnostic operation.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable name used in reports.
    fn name(&self) -> &str;

    /// Perform the probe.
    ///
    /// Return `Ok` whenever a response arrived, including non-2xx ones; the
    /// runner judges success from the status code.
    async fn run(&self, transport: &dyn ApiTransport) -> Result<ProbeOutcome, ApiError>;
}

/// Recorded result of one probe invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub succeeded: bool,
    pub status_code: Option<u16>,
    pub detail: String,
}

impl ProbeResult {
    fn from_outcome(name: &str, outcome: Result<ProbeOutcome, ApiError>) -> Self {
        match outcome {
            Ok(outcome) => Self {
                name: name.to_string(),
                succeeded: (200..300).contains(&outcome.status_code),
                status_code: Some(outcome.status_code),
                detail: outcome.detail,
            },
            Err(e) => Self {
                name: name.to_string(),
                succeeded: false,
                status_code: match &e {
                    ApiError::HttpError { status, .. } => Some(*status),
                    _ => None,
                },
                detail: e.to_string(),
            },
        }
    }
}

/// Ordered results of a probe run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    results: Vec<ProbeResult>,
}

impl ProbeReport {
    /// All results, in the order the probes ran.
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    /// Number of probes that succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded).count()
    }

    /// Number of probes that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.succeeded)
    }
}

/// Runs probes sequentially with per-probe failure isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeRunner;

impl ProbeRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run every probe in order and collect one result per probe.
    pub async fn run(&self, transport: &dyn ApiTransport, probes: &[Box<dyn Probe>]) -> ProbeReport {
        let mut results = Vec::with_capacity(probes.len());

        for probe in probes {
            let result = ProbeResult::from_outcome(probe.name(), probe.run(transport).await);

            if result.succeeded {
                info!(probe = %result.name, status = ?result.status_code, "Probe succeeded");
            } else {
                warn!(
                    probe = %result.name,
                    status = ?result.status_code,
                    detail = %result.detail,
                    "Probe failed"
                );
            }

            results.push(result);
        }

        ProbeReport { results }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
