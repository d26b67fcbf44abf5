//! Session lifecycle: validity checks, single-flight refresh, fail-closed
//! clearing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::token::{DEFAULT_EXPIRY_SKEW, DEFAULT_TOKEN_TYPE, SessionGrant, TokenRecord};
use crate::config::Config;
use crate::error::{AuthError, StoreError};
use crate::models::{RefreshRequest, RefreshResponse};
use crate::net::{GatewayRequest, HttpGateway};
use crate::store::CredentialStore;

/// Default refresh endpoint, relative to the versioned API prefix.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

type RefreshOutcome = Shared<BoxFuture<'static, Result<(), AuthError>>>;

// =============================================================================
// SessionStatus
// =============================================================================

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing stored.
    NoSession,
    /// Usable without refresh.
    Valid,
    /// Inside the expiry buffer; the next token request refreshes.
    ExpiringSoon,
    /// A refresh is in flight.
    Refreshing,
    /// Past the real expiry and not yet cleared.
    Expired,
}

/// Snapshot of the stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Whether a complete record is stored.
    pub has_token: bool,
    /// Whether the token is usable with the expiry buffer applied.
    pub is_valid: bool,
    /// Absolute expiry of the stored token.
    pub expires_at: Option<DateTime<Utc>>,
    /// Owner of the stored token.
    pub user_id: Option<String>,
    pub state: SessionState,
}

// =============================================================================
// SessionOptions
// =============================================================================

/// Tunables for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Safety buffer taken off the expiry when checking validity.
    pub expiry_skew: Duration,
    /// Refresh endpoint path.
    pub refresh_path: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            expiry_skew: DEFAULT_EXPIRY_SKEW,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            expiry_skew: Duration::from_secs(config.session.expiry_skew_secs),
            refresh_path: config.session.refresh_path.clone(),
        }
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Owns the session credential.
///
/// Cheap to clone; clones share the store, the gateway and the in-flight
/// refresh slot. Construct once and pass it to whatever needs an
/// authenticated gateway.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: CredentialStore,
    gateway: Arc<HttpGateway>,
    options: SessionOptions,
    /// At most one refresh outstanding; waiters share its outcome.
    in_flight: Mutex<Option<RefreshOutcome>>,
    /// Serializes every write to the store.
    commit: tokio::sync::Mutex<()>,
}

/// What the store holds now compared with the record a refresh started from.
enum Stored {
    Same,
    Replaced,
    Gone,
    Unreadable,
}

impl SessionManager {
    pub fn new(store: CredentialStore, gateway: Arc<HttpGateway>, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                options,
                in_flight: Mutex::new(None),
                commit: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The gateway whose bearer this manager maintains.
    pub fn gateway(&self) -> &Arc<HttpGateway> {
        &self.inner.gateway
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn expiry_skew(&self) -> Duration {
        self.inner.options.expiry_skew
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Read-only snapshot of the stored session.
    ///
    /// A storage read failure is reported as no session.
    pub async fn status(&self) -> SessionStatus {
        let record = match self.inner.load().await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Could not read stored session");
                None
            }
        };

        let Some(record) = record else {
            return SessionStatus {
                has_token: false,
                is_valid: false,
                expires_at: None,
                user_id: None,
                state: SessionState::NoSession,
            };
        };

        let now = Utc::now();
        let is_valid = record.is_valid_at(now, self.expiry_skew());
        let state = if self.is_refreshing() {
            SessionState::Refreshing
        } else if is_valid {
            SessionState::Valid
        } else if record.is_expired_at(now) {
            SessionState::Expired
        } else {
            SessionState::ExpiringSoon
        };

        SessionStatus {
            has_token: true,
            is_valid,
            expires_at: Some(record.expires_at),
            user_id: Some(record.user_id),
            state,
        }
    }

    /// Return a usable access token, refreshing first if needed.
    ///
    /// On success the gateway's bearer is set to the returned token.
    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let record = match self.inner.load().await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(AuthError::NoSession),
            Err(e) => {
                warn!(error = %e, "Could not read stored session, treating as signed out");
                return Err(AuthError::NoSession);
            }
        };

        let now = Utc::now();
        if record.is_valid_at(now, self.expiry_skew()) {
            self.inner.gateway.set_bearer(&record.access_token);
            return Ok(record.access_token);
        }

        debug!(
            user_id = %record.user_id,
            remaining_secs = record.time_until_expiry(now).as_secs(),
            "Token inside expiry buffer, refreshing"
        );
        if let Err(e) = self.refresh_token().await {
            info!(error = %e, "Session could not be refreshed");
            return Err(AuthError::SessionExpired);
        }

        match self.inner.load().await {
            Ok(Some(record)) => {
                self.inner.gateway.set_bearer(&record.access_token);
                Ok(record.access_token)
            }
            Ok(None) => Err(AuthError::SessionExpired),
            Err(e) => {
                warn!(error = %e, "Could not read refreshed session");
                Err(AuthError::SessionExpired)
            }
        }
    }

    /// Exchange the stored token for a fresh one.
    ///
    /// Concurrent callers share a single request and its outcome. Any failure
    /// clears the session before the error is returned.
    pub async fn refresh_token(&self) -> Result<(), AuthError> {
        let outcome = {
            let mut slot = self.inner.in_flight.lock();
            match slot.clone() {
                Some(existing) => {
                    debug!("Refresh already in flight, waiting for it");
                    existing
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let result = inner.run_refresh().await;
                        inner.in_flight.lock().take();
                        result
                    });
                    let owner = Arc::downgrade(&self.inner);
                    let outcome = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                // The task never reached its own cleanup.
                                if let Some(inner) = owner.upgrade() {
                                    inner.in_flight.lock().take();
                                }
                                Err(AuthError::RefreshFailed(format!("refresh task failed: {e}")))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(outcome.clone());
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Persist a session obtained from a credential exchange and start
    /// using it.
    pub async fn store_new_session(&self, grant: SessionGrant) -> Result<(), StoreError> {
        let record = grant.into_record(Utc::now());
        {
            let _guard = self.inner.commit.lock().await;
            self.inner.store.put(&record).await?;
            self.inner.gateway.set_bearer(&record.access_token);
        }
        info!(
            user_id = %record.user_id,
            expires_at = %record.expires_at,
            "Session stored"
        );
        Ok(())
    }

    /// Forget the session. Storage failures are logged, never returned.
    pub async fn clear_session(&self) {
        {
            let _guard = self.inner.commit.lock().await;
            if let Err(e) = self.inner.store.clear().await {
                warn!(error = %e, "Failed to clear stored session");
            }
        }
        self.inner.gateway.clear_bearer();
        info!("Session cleared");
    }

    /// The stored access token, whether or not it is still valid.
    pub async fn stored_token(&self) -> Option<String> {
        match self.inner.load().await {
            Ok(record) => record.map(|r| r.access_token),
            Err(e) => {
                warn!(error = %e, "Could not read stored session");
                None
            }
        }
    }

    /// Try to establish a usable token at startup.
    pub async fn initialize(&self) -> bool {
        match self.get_valid_token().await {
            Ok(_) => {
                debug!("Existing session restored");
                true
            }
            Err(e) => {
                debug!(reason = %e, "No usable session at startup");
                false
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store)
            .field("gateway", &self.inner.gateway)
            .field("options", &self.inner.options)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl Inner {
    /// Read the stored record. Holding the commit lock keeps readers from
    /// seeing, or repairing, a write that is still in progress.
    async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
        let _guard = self.commit.lock().await;
        self.store.get().await
    }

    async fn run_refresh(&self) -> Result<(), AuthError> {
        let current = {
            let _guard = self.commit.lock().await;
            match self.store.get().await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.gateway.clear_bearer();
                    return Err(AuthError::NoSession);
                }
                Err(e) => {
                    warn!(error = %e, "Could not read session to refresh, clearing");
                    self.wipe().await;
                    return Err(AuthError::RefreshFailed(e.to_string()));
                }
            }
        };

        match self.exchange(&current).await {
            Ok(refreshed) => self.commit_refreshed(&current, refreshed).await,
            Err(reason) => {
                warn!(user_id = %current.user_id, reason = %reason, "Token refresh failed");
                self.fail_closed(&current).await;
                Err(AuthError::RefreshFailed(reason))
            }
        }
    }

    async fn exchange(&self, current: &TokenRecord) -> Result<TokenRecord, String> {
        let request = GatewayRequest::post(&self.options.refresh_path)
            .json(&RefreshRequest {
                current_token: current.access_token.clone(),
            })
            .bearer(&current.access_token);

        let response = self.gateway.send(request).await.map_err(|e| e.to_string())?;
        let body: RefreshResponse = response.json().map_err(|e| e.to_string())?;

        if body.access_token.trim().is_empty() {
            return Err("refresh response has an empty access_token".to_string());
        }
        if body.expires_in <= 0 {
            return Err(format!(
                "refresh response has a non-positive expires_in ({})",
                body.expires_in
            ));
        }

        let token_type = if body.token_type.trim().is_empty() {
            DEFAULT_TOKEN_TYPE.to_string()
        } else {
            body.token_type
        };

        Ok(TokenRecord::issue(
            body.access_token,
            token_type,
            body.expires_in,
            current.user_id.clone(),
            Utc::now(),
        ))
    }

    async fn commit_refreshed(
        &self,
        current: &TokenRecord,
        refreshed: TokenRecord,
    ) -> Result<(), AuthError> {
        let _guard = self.commit.lock().await;
        match self.compare(current).await {
            Stored::Replaced => {
                info!("Session replaced during refresh, keeping the newer session");
                return Ok(());
            }
            Stored::Gone => {
                info!("Session cleared during refresh, discarding refreshed token");
                return Err(AuthError::NoSession);
            }
            Stored::Same | Stored::Unreadable => {}
        }

        if let Err(e) = self.store.put(&refreshed).await {
            warn!(error = %e, "Could not persist refreshed token, clearing");
            self.wipe().await;
            return Err(AuthError::RefreshFailed(e.to_string()));
        }

        self.gateway.set_bearer(&refreshed.access_token);
        info!(
            user_id = %refreshed.user_id,
            expires_at = %refreshed.expires_at,
            "Token refreshed"
        );
        Ok(())
    }

    async fn fail_closed(&self, current: &TokenRecord) {
        let _guard = self.commit.lock().await;
        match self.compare(current).await {
            Stored::Replaced => {
                info!("Session replaced during refresh, leaving it in place");
            }
            Stored::Gone => self.gateway.clear_bearer(),
            Stored::Same | Stored::Unreadable => self.wipe().await,
        }
    }

    async fn compare(&self, current: &TokenRecord) -> Stored {
        match self.store.get().await {
            Ok(Some(stored)) if stored.access_token == current.access_token => Stored::Same,
            Ok(Some(_)) => Stored::Replaced,
            Ok(None) => Stored::Gone,
            Err(e) => {
                warn!(error = %e, "Could not re-read session before commit");
                Stored::Unreadable
            }
        }
    }

    /// Caller must hold the commit lock.
    async fn wipe(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.gateway.clear_bearer();
    }
}
