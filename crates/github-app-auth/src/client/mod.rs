//! Authenticated access to the GitHub REST API.
//!
//! Callers depend on the narrow [`ApiTransport`] capability rather than on a
//! concrete client. [`AuthenticatedClient`] is the production implementation:
//! it attaches the current installation token from a [`CredentialCache`] to
//! each request and recovers from a single authentication rejection by
//! retrying once with a newer token, forcing a refresh when the cache has none.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::auth::exchange::{GITHUB_API_VERSION, GITHUB_JSON_MEDIA_TYPE};
use crate::auth::{AccessToken, CredentialCache};
use crate::error::ApiError;

/// A request relative to the GitHub API base URL.
///
/// # Examples
///
/// ```
/// use github_app_auth::client::ApiRequest;
///
/// let request = ApiRequest::get("/repos/octocat/hello-world/commits")
///     .with_query("per_page", "5");
/// assert_eq!(request.path, "/repos/octocat/hello-world/commits");
/// assert_eq!(request.query, vec![("per_page".to_string(), "5".to_string())]);
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the API base URL, with or without a leading slash
    pub path: String,
    /// Query string parameters in order
    pub query: Vec<(String, String)>,
    /// Media type for the `Accept` header; the GitHub JSON type when `None`
    pub accept: Option<String>,
}

impl ApiRequest {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            accept: None,
        }
    }

    /// Create a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Request a specific media type.
    pub fn with_accept(mut self, media_type: impl Into<String>) -> Self {
        self.accept = Some(media_type.into());
        self
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::JsonError` if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The GitHub `message` field of an error body, or the raw body.
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| self.text())
    }
}

/// Capability to send authenticated requests to the GitHub API.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Send `request` and return the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` when no response could be obtained, or
    /// `ApiError::AuthenticationFailed` when GitHub keeps rejecting the token.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Configuration for GitHub API client behavior.
///
/// # Examples
///
/// ```
/// use github_app_auth::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_api_url("https://ghe.example.com/api/v3")
///     .with_timeout(Duration::from_secs(10));
/// assert_eq!(config.timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GitHub API base URL
    pub api_url: String,
    /// User agent string for API requests (required by GitHub)
    pub user_agent: String,
    /// Request timeout duration
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            user_agent: concat!("github-app-auth/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
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

/// GitHub API client acting as one App installation.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use github_app_auth::auth::CredentialCache;
/// # use github_app_auth::client::{ApiRequest, ApiTransport, AuthenticatedClient, ClientConfig};
/// # async fn example(cache: Arc<CredentialCache>) -> Result<(), Box<dyn std::error::Error>> {
/// let client = AuthenticatedClient::new(cache, ClientConfig::default())?;
///
/// let response = client.send(ApiRequest::get("/rate_limit")).await?;
/// if response.is_success() {
///     let data: serde_json::Value = response.json()?;
///     println!("Rate limit: {:?}", data["resources"]["core"]);
/// }
/// # Ok(())
/// # }
/// ```
pub struct AuthenticatedClient {
    http_client: reqwest::Client,
    cache: Arc<CredentialCache>,
    config: ClientConfig,
}

impl AuthenticatedClient {
    /// Create a client drawing tokens from `cache`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidRequest` if `api_url` is not an absolute
    /// http(s) URL, or `ApiError::HttpClientError` if the HTTP client cannot
    /// be created.
    pub fn new(cache: Arc<CredentialCache>, config: ClientConfig) -> Result<Self, ApiError> {
        let base = Url::parse(&config.api_url).map_err(|e| ApiError::InvalidRequest {
            message: format!("invalid API URL '{}': {}", config.api_url, e),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidRequest {
                message: format!("API URL '{}' must use http or https", config.api_url),
            });
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            http_client,
            cache,
            config,
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the credential cache backing this client.
    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send_with_token(
        &self,
        request: &ApiRequest,
        token: &AccessToken,
    ) -> Result<ApiResponse, ApiError> {
        let accept = request.accept.as_deref().unwrap_or(GITHUB_JSON_MEDIA_TYPE);

        let response = self
            .http_client
            .request(request.method.clone(), self.url(&request.path))
            .query(&request.query)
            .bearer_auth(token.expose())
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_transport_error)?;

        debug!(
            method = %request.method,
            path = %request.path,
            status,
            bytes = body.len(),
            "GitHub API response"
        );

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl ApiTransport for AuthenticatedClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let initial = self.cache.current_token().await?;
        let response = self.send_with_token(&request, &initial).await?;
        if response.status != 401 {
            return Ok(response);
        }

        // A concurrent request may already have replaced the rejected token.
        let latest = self.cache.current_token().await?;
        let token = if latest.expose() != initial.expose() {
            debug!(
                method = %request.method,
                path = %request.path,
                "Installation token already replaced, retrying without a refresh"
            );
            latest
        } else {
            warn!(
                method = %request.method,
                path = %request.path,
                "GitHub rejected the installation token, forcing a refresh"
            );
            self.cache.force_refresh().await?
        };

        let response = self.send_with_token(&request, &token).await?;
        if response.status == 401 {
            warn!(
                method = %request.method,
                path = %request.path,
                "GitHub rejected the refreshed installation token"
            );
            return Err(ApiError::AuthenticationFailed);
        }

        Ok(response)
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

fn map_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::HttpClientError(e)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
