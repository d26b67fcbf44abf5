#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use authsession::identity::ProviderCredential;
use authsession::models::PersonName;
use async_trait::async_trait;
use authsession::store::MemoryBackend;
use authsession::{
    AuthFlow, CredentialStore, FlowPaths, HttpGateway, SecureBackend, SessionGrant,
    SessionManager, SessionOptions, StaticIdentityBridge, StoreError,
};
use serde_json::json;
use wiremock::{MockServer, ResponseTemplate};

pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";
pub const LOGIN_PATH: &str = "/api/v1/auth/apple";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";
pub const ME_PATH: &str = "/api/v1/auth/me";

pub fn gateway(server: &MockServer) -> Arc<HttpGateway> {
    gateway_with_timeout(server, Duration::from_secs(10))
}

pub fn gateway_with_timeout(server: &MockServer, timeout: Duration) -> Arc<HttpGateway> {
    Arc::new(
        HttpGateway::builder(server.uri())
            .timeout(timeout)
            .build()
            .unwrap(),
    )
}

pub fn manager_with(
    gateway: Arc<HttpGateway>,
    skew: Duration,
) -> (MemoryBackend, SessionManager) {
    let backend = MemoryBackend::new();
    let store = CredentialStore::new(Arc::new(backend.clone()));
    let options = SessionOptions {
        expiry_skew: skew,
        ..SessionOptions::default()
    };
    (backend, SessionManager::new(store, gateway, options))
}

/// A second manager over storage another manager already uses.
pub fn manager_over(backend: impl SecureBackend + 'static, gateway: Arc<HttpGateway>) -> SessionManager {
    let store = CredentialStore::new(Arc::new(backend));
    SessionManager::new(store, gateway, SessionOptions::default())
}

/// Memory storage that yields to the scheduler before every operation, so
/// concurrent callers interleave between keys.
#[derive(Debug, Clone, Default)]
pub struct YieldingBackend {
    pub inner: MemoryBackend,
}

#[async_trait]
impl SecureBackend for YieldingBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }

    fn name(&self) -> &str {
        "yielding"
    }
}

/// Manager with the default five minute buffer.
pub fn manager(server: &MockServer) -> (MemoryBackend, SessionManager) {
    manager_with(gateway(server), Duration::from_secs(300))
}

pub fn flow(
    server: &MockServer,
    bridge: StaticIdentityBridge,
) -> (MemoryBackend, AuthFlow) {
    let (backend, manager) = manager(server);
    let flow = AuthFlow::new(Arc::new(bridge), manager, FlowPaths::default());
    (backend, flow)
}

pub fn grant(token: &str, expires_in: i64) -> SessionGrant {
    SessionGrant {
        access_token: token.to_string(),
        token_type: "bearer".to_string(),
        expires_in,
        user_id: "u1".to_string(),
    }
}

pub fn token_response(token: &str, expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": expires_in,
    }))
}

pub fn credential() -> ProviderCredential {
    ProviderCredential {
        external_id: "apple-001".to_string(),
        email: Some("ada@example.com".to_string()),
        full_name: Some(PersonName {
            given_name: Some("Ada".to_string()),
            family_name: Some("Lovelace".to_string()),
        }),
        identity_token: "header.payload.signature".to_string(),
        authorization_code: Some("auth-code".to_string()),
    }
}
