//! Sign-in and sign-out orchestration.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{AuthError, TransportError};
use crate::identity::{IdentityBridge, ProviderCredential};
use crate::models::{HealthStatus, LoginRequest, LoginResponse, UserIdentity, UserInfo, UserProfile};
use crate::net::{GatewayRequest, HttpGateway};
use crate::session::{SessionGrant, SessionManager, SessionOptions};
use crate::store::{CredentialStore, backend_from_config};

/// Backend paths used by [`AuthFlow`], relative to the versioned prefix.
#[derive(Debug, Clone)]
pub struct FlowPaths {
    pub login: String,
    pub logout: String,
    pub me: String,
}

impl Default for FlowPaths {
    fn default() -> Self {
        Self {
            login: "/auth/apple".to_string(),
            logout: "/auth/logout".to_string(),
            me: "/auth/me".to_string(),
        }
    }
}

impl FlowPaths {
    pub fn from_config(config: &Config) -> Self {
        Self {
            login: config.session.login_path.clone(),
            logout: config.session.logout_path.clone(),
            me: config.session.me_path.clone(),
        }
    }
}

/// Ties an identity provider to the session manager.
pub struct AuthFlow {
    bridge: Arc<dyn IdentityBridge>,
    gateway: Arc<HttpGateway>,
    session: SessionManager,
    paths: FlowPaths,
}

impl AuthFlow {
    pub fn new(bridge: Arc<dyn IdentityBridge>, session: SessionManager, paths: FlowPaths) -> Self {
        Self {
            bridge,
            gateway: Arc::clone(session.gateway()),
            session,
            paths,
        }
    }

    /// Wire up storage, gateway, and session manager from configuration.
    pub fn from_config(config: &Config, bridge: Arc<dyn IdentityBridge>) -> Result<Self, AuthError> {
        let store = CredentialStore::new(backend_from_config(config)?);
        info!(backend = store.backend_name(), "Credential store ready");
        let gateway = Arc::new(HttpGateway::from_config(config)?);
        let session = SessionManager::new(store, gateway, SessionOptions::from_config(config));
        Ok(Self::new(bridge, session, FlowPaths::from_config(config)))
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Restore a stored session, refreshing it if needed.
    pub async fn initialize(&self) -> bool {
        self.session.initialize().await
    }

    /// Run provider sign-in and exchange its credential for a session.
    #[instrument(skip(self), fields(provider = self.bridge.name()))]
    pub async fn sign_in(&self) -> Result<UserIdentity, AuthError> {
        if !self.bridge.is_available().await {
            return Err(AuthError::ProviderUnavailable(format!(
                "{} sign-in is not available",
                self.bridge.name()
            )));
        }

        let credential = self.bridge.sign_in().await.map_err(|e| {
            let err = AuthError::from(e);
            if err.is_silent() {
                debug!("Sign-in cancelled by user");
            } else {
                warn!(error = %err, "Identity provider sign-in failed");
            }
            err
        })?;

        let login = self.exchange(&credential).await?;

        let grant = SessionGrant {
            access_token: login.access_token,
            token_type: login.token_type,
            expires_in: login.expires_in,
            user_id: credential.external_id.clone(),
        };
        self.session.store_new_session(grant).await?;

        let user = login.user;
        let identity = UserIdentity {
            user_id: credential.external_id,
            email: user
                .as_ref()
                .and_then(|u| u.email.clone())
                .or(credential.email),
            full_name: user
                .and_then(|u| u.full_name)
                .or_else(|| credential.full_name.as_ref().and_then(|n| n.display())),
        };
        info!(user_id = %identity.user_id, "Signed in");
        Ok(identity)
    }

    async fn exchange(&self, credential: &ProviderCredential) -> Result<LoginResponse, AuthError> {
        let user_info = UserInfo {
            email: credential.email.clone(),
            name: credential.full_name.clone(),
        };
        let request = LoginRequest {
            identity_token: credential.identity_token.clone(),
            authorization_code: credential.authorization_code.clone(),
            user_info: (!user_info.is_empty()).then_some(user_info),
        };

        let response = self
            .gateway
            .send(GatewayRequest::post(&self.paths.login).json(&request))
            .await
            .map_err(|e| match e {
                TransportError::Http { status, message } => {
                    warn!(status, message = %message, "Backend rejected sign-in");
                    AuthError::BackendRejected { status, message }
                }
                other => AuthError::Transport(other),
            })?;

        let login: LoginResponse = response.json().map_err(|e| AuthError::BackendRejected {
            status: response.status,
            message: e.to_string(),
        })?;

        if login.access_token.trim().is_empty() || login.expires_in <= 0 {
            return Err(AuthError::BackendRejected {
                status: response.status,
                message: "login response is missing a usable token".to_string(),
            });
        }
        Ok(login)
    }

    /// Sign out. Never fails: the backend call is best-effort and local
    /// state is always cleared.
    ///
    /// The backend is told about the stored token even when this process has
    /// not attached it to the gateway yet.
    pub async fn sign_out(&self) {
        let token = match self.session.stored_token().await {
            Some(token) => Some(token),
            None => self.gateway.bearer(),
        };
        if let Some(token) = token {
            let request = GatewayRequest::post(&self.paths.logout).bearer(token);
            if let Err(e) = self.gateway.send(request).await {
                warn!(error = %e, "Backend logout failed, clearing local session anyway");
            }
        }
        self.session.clear_session().await;
    }

    /// Fetch the signed-in user's profile.
    ///
    /// A `401` means the backend no longer accepts the session; it is cleared
    /// and [`AuthError::SessionExpired`] is returned.
    pub async fn current_user(&self) -> Result<UserProfile, AuthError> {
        let token = self.session.get_valid_token().await?;
        let request = GatewayRequest::get(&self.paths.me).bearer(token);

        match self.gateway.send(request).await {
            Ok(response) => Ok(response.json()?),
            Err(TransportError::Http { status: 401, .. }) => {
                info!("Backend rejected the session, clearing it");
                self.session.clear_session().await;
                Err(AuthError::SessionExpired)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Backend liveness check.
    pub async fn health(&self) -> Result<HealthStatus, AuthError> {
        let response = self
            .gateway
            .send(GatewayRequest::get("/health").unversioned())
            .await?;
        Ok(response.json()?)
    }
}

impl std::fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlow")
            .field("provider", &self.bridge.name())
            .field("session", &self.session)
            .field("paths", &self.paths)
            .finish()
    }
}
