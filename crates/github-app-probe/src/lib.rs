//! # GitHub App Probe
//!
//! Command-line diagnostics for a GitHub App installation.
//!
//! The probe loads the app identity from a `.env`-style file and the process
//! environment, obtains an installation token, lists the repositories the
//! installation can reach, and then exercises a handful of REST endpoints.
//! Probe failures are reported; only identity or token failures abort the run.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File, FileFormat};
use github_app_auth::auth::{
    CredentialCache, ExchangeConfig, GitHubAppId, GitHubTokenExchanger, Identity,
    InstallationId, Rs256AssertionMinter, SigningKey, TokenSnapshot,
};
use github_app_auth::client::{AuthenticatedClient, ClientConfig};
use github_app_auth::probes::{
    list_installation_repositories, DownloadContentsProbe, GetContentsProbe, ListCommitsProbe,
    Probe, ProbeReport, ProbeRunner, RateLimitProbe, RepositoryRef, RepositorySummary,
};
use github_app_auth::{ApiError, AuthError, ValidationError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_ENV_FILE: &str = ".env";
const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("github-app-probe/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// CLI Structure
// ============================================================================

/// GitHub App Probe - installation token and REST API diagnostics
#[derive(Debug, Parser)]
#[command(name = "github-app-probe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Authenticate as a GitHub App installation and probe the REST API")]
pub struct Cli {
    /// Settings file with KEY=value lines (defaults to ./.env when present)
    #[arg(short, long, env = "GITHUB_APP_PROBE_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Repository to probe as owner/name (defaults to the first accessible one)
    #[arg(short, long)]
    pub repository: Option<RepositoryRef>,

    /// File used by the contents probes
    #[arg(short, long, default_value = "README.md")]
    pub path: String,

    /// GitHub API base URL, overriding GITHUB_API_URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Overall deadline in seconds
    #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Logging setup failed: {0:#}")]
    Logging(anyhow::Error),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// 1 for configuration problems, 2 when no token can be obtained or
    /// GitHub rejects it, 3 for other API failures and the overall deadline.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Logging(_) => 1,
            Self::Authentication(_) => 2,
            Self::Api(ApiError::Auth(_)) | Self::Api(ApiError::AuthenticationFailed) => 2,
            Self::Api(_) | Self::Timeout { .. } => 3,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid value for {key}: {source}")]
    Invalid {
        key: String,
        #[source]
        source: ValidationError,
    },

    #[error("Unusable private key: {0}")]
    Key(#[source] AuthError),
}

// ============================================================================
// Settings
// ============================================================================

/// Where the app's private key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// PEM text supplied directly
    Inline(String),
    /// Path to a PEM file
    File(PathBuf),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline(_) => f.debug_tuple("Inline").field(&"<REDACTED>").finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Resolved app settings.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub app_id: GitHubAppId,
    pub installation_id: InstallationId,
    pub private_key: KeySource,
    pub api_url: String,
}

impl AppSettings {
    fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_id = parse_required(values, "app_id", "GITHUB_APP_ID")?;
        let installation_id = parse_required(values, "installation_id", "GITHUB_INSTALLATION_ID")?;

        let private_key = match (
            lookup(values, "private_key"),
            lookup(values, "private_key_path"),
        ) {
            (Some(pem), _) => KeySource::Inline(pem.to_string()),
            (None, Some(path)) => KeySource::File(PathBuf::from(path)),
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    key: "GITHUB_PRIVATE_KEY or GITHUB_PRIVATE_KEY_PATH".to_string(),
                })
            }
        };

        let api_url = lookup(values, "api_url")
            .unwrap_or(DEFAULT_API_URL)
            .to_string();

        Ok(Self {
            app_id,
            installation_id,
            private_key,
            api_url,
        })
    }

    /// Load the signing key and build the identity.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Key` if the key cannot be read or parsed.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        let signing_key = match &self.private_key {
            KeySource::Inline(pem) => SigningKey::from_pem(pem),
            KeySource::File(path) => SigningKey::from_pem_file(path),
        }
        .map_err(ConfigError::Key)?;

        Ok(Identity::new(
            self.app_id,
            self.installation_id,
            signing_key,
        ))
    }
}

/// Process environment source for `GITHUB_*` settings.
pub fn process_environment() -> Environment {
    Environment::with_prefix("GITHUB")
}

/// Load settings from the settings file, then `environment` on top of it.
///
/// An explicitly named file must exist; the default `./.env` is optional.
///
/// # Errors
///
/// Returns `ConfigError` if a source cannot be read or a required key is
/// missing or malformed.
pub fn load_settings(
    env_file: Option<&Path>,
    environment: Environment,
) -> Result<AppSettings, ConfigError> {
    let (path, required) = match env_file {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_ENV_FILE), false),
    };

    if path.exists() {
        info!(path = %path.display(), "Loading settings file");
    } else if !required {
        warn!(path = %path.display(), "Settings file not found, using process environment only");
    }

    let mut values = read_source(
        Config::builder().add_source(
            File::from(path.as_path())
                .format(FileFormat::Ini)
                .required(required),
        ),
    )?;
    values.extend(read_source(Config::builder().add_source(environment))?);

    AppSettings::from_values(&values)
}

/// Collect one source as flat `key -> value` pairs under canonical keys.
fn read_source(builder: ConfigBuilder<DefaultState>) -> Result<HashMap<String, String>, ConfigError> {
    let raw: HashMap<String, String> = builder.build()?.try_deserialize()?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| (canonical_key(&key), unquote(&value).to_string()))
        .collect())
}

/// `GITHUB_APP_ID`, `export GITHUB_APP_ID`, `github_app_id` and `app_id` all
/// name the same setting.
fn canonical_key(key: &str) -> String {
    let key = key.trim().to_ascii_lowercase();
    let key = match key.strip_prefix("export ") {
        Some(exported) => exported.trim_start(),
        None => key.as_str(),
    };
    match key.strip_prefix("github_") {
        Some(stripped) => stripped.to_string(),
        None => key.to_string(),
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn lookup<'a>(values: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    values
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_required<T>(values: &HashMap<String, String>, key: &str, name: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = ValidationError>,
{
    lookup(values, key)
        .ok_or_else(|| ConfigError::MissingRequired {
            key: name.to_string(),
        })?
        .parse()
        .map_err(|source| ConfigError::Invalid {
            key: name.to_string(),
            source,
        })
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "github_app_auth={level},github_app_probe={level}"
            ))
        })
        .with_context(|| format!("invalid log level '{}'", level))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.context("failed to install tracing subscriber")
}

// ============================================================================
// Probe Run
// ============================================================================

/// Probes for `target`, or only the account-level ones when there is none.
pub fn build_probes(target: Option<&RepositoryRef>, path: &str) -> Vec<Box<dyn Probe>> {
    let mut probes: Vec<Box<dyn Probe>> = Vec::new();
    if let Some(repository) = target {
        probes.push(Box::new(
            GetContentsProbe::new(repository.clone()).with_path(path),
        ));
        probes.push(Box::new(
            DownloadContentsProbe::new(repository.clone()).with_path(path),
        ));
        probes.push(Box::new(ListCommitsProbe::new(repository.clone())));
    }
    probes.push(Box::new(RateLimitProbe::new()));
    probes
}

/// Human-readable report, one entry per probe.
pub fn render_report(report: &ProbeReport) -> String {
    let mut out = String::new();
    for (index, result) in report.results().iter().enumerate() {
        let status = result
            .status_code
            .map(|s| format!(" (Status: {})", s))
            .unwrap_or_default();
        if result.succeeded {
            out.push_str(&format!(
                "{}. ✅ {} succeeded{}\n   {}\n",
                index + 1,
                result.name,
                status,
                result.detail
            ));
        } else {
            out.push_str(&format!(
                "{}. ❌ {} failed{}: {}\n",
                index + 1,
                result.name,
                status,
                result.detail
            ));
        }
    }
    out.push_str(&format!(
        "\n{}/{} probes succeeded\n",
        report.succeeded(),
        report.results().len()
    ));
    out
}

/// Token details safe to print: length, expiry and what the token may access.
pub fn render_token_summary(snapshot: &TokenSnapshot, now: DateTime<Utc>) -> String {
    let mut out = format!(
        "Token length: {} characters\nToken expires at: {} ({} minutes from now)\n",
        snapshot.token_length,
        snapshot.expires_at.to_rfc3339(),
        (snapshot.expires_at - now).num_minutes()
    );
    if let Some(selection) = &snapshot.repository_selection {
        out.push_str(&format!("Repository selection: {}\n", selection));
    }
    if let Some(permissions) = snapshot.permission_summary() {
        out.push_str(&format!("Permissions: {}\n", permissions));
    }
    out
}

/// Load settings, authenticate and run every probe within the deadline.
///
/// # Errors
///
/// Returns `CliError` on configuration failure, when no token can be
/// obtained, when the repository listing fails, or when the deadline passes.
/// Individual probe failures are part of the returned report instead.
pub async fn run(cli: &Cli, environment: Environment) -> Result<ProbeReport, CliError> {
    let mut settings = load_settings(cli.env_file.as_deref(), environment)?;
    if let Some(url) = &cli.api_url {
        settings.api_url = url.clone();
    }
    let identity = settings.identity()?;

    info!(
        app_id = %identity.app_id(),
        installation_id = %identity.installation_id(),
        api_url = %settings.api_url,
        "Loaded GitHub App identity"
    );

    let deadline = Duration::from_secs(cli.timeout);
    match tokio::time::timeout(deadline, probe_installation(cli, &settings, identity)).await {
        Ok(result) => result,
        Err(_) => Err(CliError::Timeout {
            seconds: cli.timeout,
        }),
    }
}

async fn probe_installation(
    cli: &Cli,
    settings: &AppSettings,
    identity: Identity,
) -> Result<ProbeReport, CliError> {
    let exchanger = GitHubTokenExchanger::new(
        ExchangeConfig::default()
            .with_api_url(&settings.api_url)
            .with_user_agent(USER_AGENT),
    )?;
    let cache = Arc::new(CredentialCache::new(
        identity,
        Arc::new(Rs256AssertionMinter::new()),
        Arc::new(exchanger),
    ));
    let client = AuthenticatedClient::new(
        cache.clone(),
        ClientConfig::default()
            .with_api_url(&settings.api_url)
            .with_user_agent(USER_AGENT),
    )?;

    println!("Getting installation access token...");
    cache.current_token().await?;
    if let Some(snapshot) = cache.snapshot() {
        print!("{}", render_token_summary(&snapshot, Utc::now()));
    }

    println!("\nFetching repositories...");
    let repositories = list_installation_repositories(&client).await?;
    println!("Found {} repositories:", repositories.len());
    for (index, repository) in repositories.iter().enumerate() {
        println!(
            "{}. {} ({})",
            index + 1,
            repository.full_name,
            repository.html_url
        );
    }

    let target = cli
        .repository
        .clone()
        .or_else(|| repositories.first().map(RepositorySummary::reference));
    match &target {
        Some(repository) => println!("\n=== API Testing with {} ===", repository),
        None => println!("\nNo repositories available, running account-level probes only"),
    }

    let probes = build_probes(target.as_ref(), &cli.path);
    let report = ProbeRunner::new().run(&client, &probes).await;
    print!("{}", render_report(&report));

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Probe run complete"
    );
    Ok(report)
}

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.json_logs).map_err(CliError::Logging)?;

    run(&cli, process_environment()).await?;
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
