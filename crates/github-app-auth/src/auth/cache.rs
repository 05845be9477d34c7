//! Installation token cache with single-flight refresh.
//!
//! The cache owns the current [`CachedToken`] and hands out its value to any
//! number of concurrent callers. When the token is missing or inside the
//! refresh skew, exactly one caller (the leader) mints an assertion and
//! performs the exchange; everyone else arriving meanwhile waits for the
//! leader's outcome on a `watch` channel.
//!
//! Refresh state machine:
//!
//! ```text
//!   Idle ──(stale / forced)──▶ Refreshing(rx) ──(outcome sent)──▶ Idle
//! ```
//!
//! The token itself sits behind a separate read/write lock that is only held
//! for the duration of a clone, never across an `.await`.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    AccessToken, AssertionMinter, CachedToken, Clock, Identity, SystemClock, TokenExchanger,
};
use crate::error::AuthError;

type RefreshOutcome = Result<AccessToken, AuthError>;

/// Configuration for token refresh behavior.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Refresh when the cached token has this much lifetime left, or less
    pub refresh_skew: Duration,

    /// Deadline covering assertion minting and the token exchange
    pub refresh_timeout: std::time::Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::seconds(60),
            refresh_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Non-secret view of the cached token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub token_length: usize,
    pub repository_selection: Option<String>,
    pub permissions: Option<serde_json::Value>,
}

impl TokenSnapshot {
    /// Granted permissions as `name=level` pairs, e.g. `contents=read, metadata=read`.
    pub fn permission_summary(&self) -> Option<String> {
        let permissions = self.permissions.as_ref()?.as_object()?;
        Some(
            permissions
                .iter()
                .map(|(name, level)| match level.as_str() {
                    Some(level) => format!("{}={}", name, level),
                    None => format!("{}={}", name, level),
                })
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

enum RefreshState {
    Idle,
    Refreshing {
        generation: u64,
        receiver: watch::Receiver<Option<RefreshOutcome>>,
    },
}

enum Role {
    Leader {
        generation: u64,
        sender: watch::Sender<Option<RefreshOutcome>>,
    },
    Follower(watch::Receiver<Option<RefreshOutcome>>),
}

/// Process-scoped cache for one installation's access token.
///
/// Construct one per [`Identity`] and share it (usually behind an `Arc`)
/// with every component that needs a bearer token.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use github_app_auth::auth::{
/// #     CredentialCache, ExchangeConfig, GitHubTokenExchanger, Identity, Rs256AssertionMinter,
/// # };
/// # async fn example(identity: Identity) -> Result<(), Box<dyn std::error::Error>> {
/// let exchanger = GitHubTokenExchanger::new(ExchangeConfig::default())?;
/// let cache = CredentialCache::new(
///     identity,
///     Arc::new(Rs256AssertionMinter::new()),
///     Arc::new(exchanger),
/// );
///
/// let token = cache.current_token().await?;
/// println!("token has {} characters", token.len());
/// # Ok(())
/// # }
/// ```
pub struct CredentialCache {
    identity: Identity,
    minter: Arc<dyn AssertionMinter>,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    token: RwLock<Option<CachedToken>>,
    state: Mutex<RefreshState>,
    next_generation: AtomicU64,
    exchanges: AtomicU64,
}

impl CredentialCache {
    /// Create an empty cache for `identity`.
    pub fn new(
        identity: Identity,
        minter: Arc<dyn AssertionMinter>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Self {
        Self {
            identity,
            minter,
            exchanger,
            clock: Arc::new(SystemClock),
            config: CacheConfig::default(),
            token: RwLock::new(None),
            state: Mutex::new(RefreshState::Idle),
            next_generation: AtomicU64::new(0),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Replace the refresh configuration.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock used by [`current_token`](Self::current_token) and
    /// [`force_refresh`](Self::force_refresh).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the identity this cache authenticates as.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get the refresh configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of token exchanges this cache has started.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Metadata about the cached token, if any.
    pub fn snapshot(&self) -> Option<TokenSnapshot> {
        self.read_token().as_ref().map(|t| TokenSnapshot {
            fetched_at: t.fetched_at(),
            expires_at: t.expires_at(),
            token_length: t.value().len(),
            repository_selection: t.repository_selection().map(str::to_string),
            permissions: t.permissions().cloned(),
        })
    }

    /// Get a usable token as of the cache's clock.
    pub async fn current_token(&self) -> Result<AccessToken, AuthError> {
        self.current_token_at(self.clock.now()).await
    }

    /// Get a token with more than the refresh skew of lifetime left at `now`.
    ///
    /// Refreshes when needed. Concurrent callers share a single in-flight
    /// refresh and all observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns the refresh error, identical for every caller that waited on it.
    pub async fn current_token_at(&self, now: DateTime<Utc>) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.fresh_token(now) {
            return Ok(token);
        }

        self.refresh(now, false).await
    }

    /// Refresh regardless of the cached token's lifetime, as of the cache's clock.
    pub async fn force_refresh(&self) -> Result<AccessToken, AuthError> {
        self.force_refresh_at(self.clock.now()).await
    }

    /// Refresh regardless of the cached token's lifetime.
    ///
    /// Joins a refresh that is already in flight instead of starting another.
    pub async fn force_refresh_at(&self, now: DateTime<Utc>) -> Result<AccessToken, AuthError> {
        self.refresh(now, true).await
    }

    fn read_token(&self) -> std::sync::RwLockReadGuard<'_, Option<CachedToken>> {
        self.token.read().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_token(&self, now: DateTime<Utc>) -> Option<AccessToken> {
        self.read_token()
            .as_ref()
            .filter(|t| t.is_fresh_at(now, self.config.refresh_skew))
            .map(|t| t.value().clone())
    }

    async fn refresh(&self, now: DateTime<Utc>, force: bool) -> Result<AccessToken, AuthError> {
        let role = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &*state {
                RefreshState::Refreshing { receiver, .. } => Role::Follower(receiver.clone()),
                RefreshState::Idle => {
                    // A refresh may have completed between the caller's check and now.
                    if !force {
                        if let Some(token) = self.fresh_token(now) {
                            return Ok(token);
                        }
                    }

                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    let (sender, receiver) = watch::channel(None);
                    *state = RefreshState::Refreshing {
                        generation,
                        receiver,
                    };
                    Role::Leader { generation, sender }
                }
            }
        };

        match role {
            Role::Follower(receiver) => {
                debug!(
                    installation_id = %self.identity.installation_id(),
                    "Waiting for in-flight token refresh"
                );
                wait_for_outcome(receiver).await
            }
            Role::Leader { generation, sender } => {
                let guard = RefreshGuard {
                    cache: self,
                    generation,
                    sender: Some(sender),
                };

                let outcome = self.perform_refresh(now, force).await.map(|token| {
                    let value = token.value().clone();
                    *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
                    value
                });

                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    async fn perform_refresh(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<CachedToken, AuthError> {
        let installation_id = self.identity.installation_id();
        info!(
            installation_id = %installation_id,
            forced = force,
            "Refreshing installation access token"
        );

        let attempt = async {
            let assertion = self.minter.mint(&self.identity, now)?;
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            self.exchanger.exchange(&assertion, installation_id).await
        };

        let result = match tokio::time::timeout(self.config.refresh_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout {
                seconds: self.config.refresh_timeout.as_secs(),
            }),
        }
        .and_then(|token| {
            if token.expires_at() <= now {
                Err(AuthError::MalformedResponse {
                    message: format!("token already expired at {}", token.expires_at()),
                })
            } else {
                Ok(token)
            }
        });

        match &result {
            Ok(token) => info!(
                installation_id = %installation_id,
                expires_at = %token.expires_at(),
                token_length = token.value().len(),
                "Installation access token refreshed"
            ),
            Err(e) => warn!(
                installation_id = %installation_id,
                error = %e,
                transient = e.is_transient(),
                "Installation access token refresh failed"
            ),
        }

        result
    }

    fn finish(&self, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(&*state, RefreshState::Refreshing { generation: g, .. } if *g == generation) {
            *state = RefreshState::Idle;
        }
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .field("token", &self.snapshot())
            .finish()
    }
}

/// Leader-side handle on an in-flight refresh.
///
/// Dropping it without calling `complete` (the leader's future was cancelled)
/// returns the cache to `Idle` and fails every waiter with `RefreshCancelled`.
struct RefreshGuard<'a> {
    cache: &'a CredentialCache,
    generation: u64,
    sender: Option<watch::Sender<Option<RefreshOutcome>>>,
}

impl RefreshGuard<'_> {
    fn complete(mut self, outcome: RefreshOutcome) {
        self.cache.finish(self.generation);
        if let Some(sender) = self.sender.take() {
            // No receivers left is fine; nobody is waiting.
            let _ = sender.send(Some(outcome));
        }
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            warn!(
                installation_id = %self.cache.identity.installation_id(),
                "Token refresh cancelled before completion"
            );
            self.cache.finish(self.generation);
            let _ = sender.send(Some(Err(AuthError::RefreshCancelled)));
        }
    }
}

async fn wait_for_outcome(mut receiver: watch::Receiver<Option<RefreshOutcome>>) -> RefreshOutcome {
    match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Err(AuthError::RefreshCancelled)),
        Err(_) => Err(AuthError::RefreshCancelled),
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
