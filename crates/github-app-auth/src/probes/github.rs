//! Probes for the repository, contents, commits and rate limit endpoints.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::str::FromStr;

use super::{Probe, ProbeOutcome};
use crate::client::{ApiRequest, ApiResponse, ApiTransport};
use crate::error::{ApiError, ValidationError};

/// Media type that makes the contents endpoint return the raw file.
pub const GITHUB_RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// A repository named as `owner/name`.
///
/// # Examples
///
/// ```
/// use github_app_auth::probes::RepositoryRef;
///
/// let repo: RepositoryRef = "octocat/hello-world".parse().unwrap();
/// assert_eq!(repo.owner, "octocat");
/// assert_eq!(repo.name, "hello-world");
/// assert_eq!(repo.to_string(), "octocat/hello-world");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    fn api_path(&self) -> String {
        format!("/repos/{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFormat {
            field: "repository".to_string(),
            message: format!("'{}' is not in owner/name form", s),
        };

        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(Self::new(owner, name))
    }
}

/// Repository entry from the installation repository listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub html_url: String,
    pub owner: RepositoryOwner,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

impl RepositorySummary {
    /// The `owner/name` reference for this repository.
    pub fn reference(&self) -> RepositoryRef {
        RepositoryRef::new(self.owner.login.clone(), self.name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct InstallationRepositories {
    repositories: Vec<RepositorySummary>,
}

/// List the repositories the installation can access (first page only).
///
/// # Errors
///
/// Returns `ApiError::HttpError` for a non-2xx status, or the transport error.
pub async fn list_installation_repositories(
    transport: &dyn ApiTransport,
) -> Result<Vec<RepositorySummary>, ApiError> {
    let response = transport
        .send(ApiRequest::get("/installation/repositories").with_query("per_page", "100"))
        .await?;

    if !response.is_success() {
        return Err(ApiError::HttpError {
            status: response.status,
            message: response.error_message(),
        });
    }

    Ok(response.json::<InstallationRepositories>()?.repositories)
}

fn rejected(response: &ApiResponse) -> ProbeOutcome {
    ProbeOutcome::new(response.status, response.error_message())
}

/// Each path segment is percent-encoded so `?`, `#` and spaces stay part of the file name.
fn contents_path(repository: &RepositoryRef, path: &str) -> String {
    let encoded: Vec<_> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(urlencoding::encode)
        .collect();
    format!("{}/contents/{}", repository.api_path(), encoded.join("/"))
}

// ============================================================================
// Contents
// ============================================================================

/// Fetches file metadata through the contents endpoint.
#[derive(Debug, Clone)]
pub struct GetContentsProbe {
    repository: RepositoryRef,
    path: String,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(default)]
    size: u64,
}

impl GetContentsProbe {
    /// Probe `README.md` in `repository`.
    pub fn new(repository: RepositoryRef) -> Self {
        Self {
            repository,
            path: "README.md".to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl Probe for GetContentsProbe {
    fn name(&self) -> &str {
        "get_contents"
    }

    async fn run(&self, transport: &dyn ApiTransport) -> Result<ProbeOutcome, ApiError> {
        let response = transport
            .send(ApiRequest::get(contents_path(&self.repository, &self.path)))
            .await?;
        if !response.is_success() {
            return Ok(rejected(&response));
        }

        let entry: ContentEntry = response.json()?;
        Ok(ProbeOutcome::new(
            response.status,
            format!("File: {}, Size: {} bytes", entry.name, entry.size),
        ))
    }
}

/// Downloads raw file content through the contents endpoint.
#[derive(Debug, Clone)]
pub struct DownloadContentsProbe {
    repository: RepositoryRef,
    path: String,
}

impl DownloadContentsProbe {
    /// Probe `README.md` in `repository`.
    pub fn new(repository: RepositoryRef) -> Self {
        Self {
            repository,
            path: "README.md".to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl Probe for DownloadContentsProbe {
    fn name(&self) -> &str {
        "download_contents"
    }

    async fn run(&self, transport: &dyn ApiTransport) -> Result<ProbeOutcome, ApiError> {
        let request = ApiRequest::get(contents_path(&self.repository, &self.path))
            .with_accept(GITHUB_RAW_MEDIA_TYPE);
        let response = transport.send(request).await?;
        if !response.is_success() {
            return Ok(rejected(&response));
        }

        let content_type = response.header("content-type").unwrap_or("unknown");
        Ok(ProbeOutcome::new(
            response.status,
            format!(
                "Content-Type: {}, Downloaded: {} bytes",
                content_type,
                response.body.len()
            ),
        ))
    }
}

// ============================================================================
// Commits
// ============================================================================

/// Lists the most recent commits of a repository.
#[derive(Debug, Clone)]
pub struct ListCommitsProbe {
    repository: RepositoryRef,
    per_page: u8,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: Option<String>,
}

impl ListCommitsProbe {
    pub fn new(repository: RepositoryRef) -> Self {
        Self {
            repository,
            per_page: 5,
        }
    }
}

#[async_trait]
impl Probe for ListCommitsProbe {
    fn name(&self) -> &str {
        "list_commits"
    }

    async fn run(&self, transport: &dyn ApiTransport) -> Result<ProbeOutcome, ApiError> {
        let request = ApiRequest::get(format!("{}/commits", self.repository.api_path()))
            .with_query("per_page", self.per_page.to_string());
        let response = transport.send(request).await?;
        if !response.is_success() {
            return Ok(rejected(&response));
        }

        let commits: Vec<CommitEntry> = response.json()?;
        let mut detail = format!("Found {} commits", commits.len());
        if let Some(latest) = commits.first() {
            let short_sha: String = latest.sha.chars().take(7).collect();
            let author = latest
                .commit
                .author
                .as_ref()
                .and_then(|a| a.name.as_deref())
                .unwrap_or("unknown");
            detail.push_str(&format!(", latest: {} by {}", short_sha, author));
        }

        Ok(ProbeOutcome::new(response.status, detail))
    }
}

// ============================================================================
// Rate Limit
// ============================================================================

/// Reads the core rate limit for the installation token.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitProbe;

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitWindow,
}

#[derive(Debug, Deserialize)]
struct RateLimitWindow {
    limit: u32,
    remaining: u32,
    reset: i64,
}

impl RateLimitProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Probe for RateLimitProbe {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn run(&self, transport: &dyn ApiTransport) -> Result<ProbeOutcome, ApiError> {
        let response = transport.send(ApiRequest::get("/rate_limit")).await?;
        if !response.is_success() {
            return Ok(rejected(&response));
        }

        let core = response.json::<RateLimitResponse>()?.resources.core;
        let reset = DateTime::from_timestamp(core.reset, 0)
            .map(|t| t.format("%H:%M:%S UTC").to_string())
            .unwrap_or_else(|| core.reset.to_string());

        Ok(ProbeOutcome::new(
            response.status,
            format!(
                "Core API: {}/{} remaining (Reset: {})",
                core.remaining, core.limit, reset
            ),
        ))
    }
}

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;
