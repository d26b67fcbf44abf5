//! Secure persistence for the session credential.
//!
//! Two layers:
//! - [`SecureBackend`] - a string key/value store backed by platform secure
//!   storage ([`KeyringBackend`]), sealed files ([`FileBackend`]), or memory
//!   ([`MemoryBackend`]).
//! - [`CredentialStore`] - maps a [`TokenRecord`] onto the fixed logical keys
//!   and guarantees a half-written record is never returned as valid.

mod cipher;
mod file;
mod memory;

#[cfg(feature = "system-keyring")]
mod keyring;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

pub use cipher::SealingKey;
pub use file::FileBackend;
pub use memory::MemoryBackend;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringBackend;

use crate::config::{Config, StorageBackend};
use crate::error::StoreError;
use crate::session::token::{DEFAULT_TOKEN_TYPE, TokenRecord};

/// Logical key holding the bearer token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Logical key holding the expiry as stringified epoch milliseconds.
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";
/// Logical key holding the user id.
pub const USER_ID_KEY: &str = "user_id";
/// Auxiliary key holding the token type. Not required for a record to exist.
pub const TOKEN_TYPE_KEY: &str = "token_type";

/// Write order for [`CredentialStore::put`].
const RECORD_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, TOKEN_EXPIRY_KEY, USER_ID_KEY, TOKEN_TYPE_KEY];

// =============================================================================
// SecureBackend trait
// =============================================================================

/// Trait for secure key/value backends.
///
/// Implementations must be thread-safe. `delete` of a missing key succeeds.
#[async_trait]
pub trait SecureBackend: Send + Sync {
    /// Read a value, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Name of this backend.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: SecureBackend + ?Sized> SecureBackend for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: SecureBackend + ?Sized> SecureBackend for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the backend selected in configuration.
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn SecureBackend>, StoreError> {
    let storage = &config.storage;
    let backend: Arc<dyn SecureBackend> = match storage.backend {
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Arc::new(KeyringBackend::with_service(&storage.service)),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => {
            warn!(
                "Keyring storage requested but system-keyring feature not enabled, falling back to file storage"
            );
            Arc::new(FileBackend::new(&storage.dir, sealing_key(config)?))
        }
        StorageBackend::File => Arc::new(FileBackend::new(&storage.dir, sealing_key(config)?)),
        StorageBackend::Memory => Arc::new(MemoryBackend::new()),
    };
    debug!(backend = backend.name(), "Secure storage backend selected");
    Ok(backend)
}

fn sealing_key(config: &Config) -> Result<SealingKey, StoreError> {
    let encoded = config.storage.encryption_key.as_deref().ok_or_else(|| {
        StoreError::Crypto("file storage requires storage.encryption_key".to_string())
    })?;
    SealingKey::from_base64(encoded)
}

// =============================================================================
// CredentialStore
// =============================================================================

/// Persists a single [`TokenRecord`] across the fixed logical keys.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecureBackend>,
}

impl CredentialStore {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn SecureBackend>) -> Self {
        Self { backend }
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Persist a record, replacing any previous one.
    ///
    /// Stale keys are cleared first so a failure part way through can only
    /// leave an incomplete triple, which [`get`](Self::get) reports as absent.
    /// On failure the keys already written are rolled back best-effort.
    #[instrument(skip(self, record), fields(backend = self.backend.name()))]
    pub async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        self.clear().await?;

        let values = [
            record.access_token.clone(),
            record.expires_at_millis().to_string(),
            record.user_id.clone(),
            record.token_type.clone(),
        ];

        for (written, (key, value)) in RECORD_KEYS.iter().zip(values.iter()).enumerate() {
            if let Err(e) = self.backend.set(key, value).await {
                warn!(key, error = %e, "Credential write failed, rolling back");
                for done in &RECORD_KEYS[..written] {
                    if let Err(rollback) = self.backend.delete(done).await {
                        warn!(key = done, error = %rollback, "Rollback delete failed");
                    }
                }
                return Err(StoreError::PartialWrite {
                    key: (*key).to_string(),
                    message: e.to_string(),
                });
            }
        }

        debug!(user_id = %record.user_id, "Credential stored");
        Ok(())
    }

    /// Load the stored record.
    ///
    /// Returns `None` unless the token, expiry, and user id are all present
    /// and the expiry parses. Partial state is cleaned up best-effort, which
    /// writes to the backend: callers must not run `get` concurrently with
    /// [`put`](Self::put) on the same backend.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn get(&self) -> Result<Option<TokenRecord>, StoreError> {
        let access_token = self.backend.get(ACCESS_TOKEN_KEY).await?;
        let expiry = self.backend.get(TOKEN_EXPIRY_KEY).await?;
        let user_id = self.backend.get(USER_ID_KEY).await?;

        let (access_token, expiry, user_id) = match (access_token, expiry, user_id) {
            (Some(token), Some(expiry), Some(user)) => (token, expiry, user),
            (None, None, None) => return Ok(None),
            partial => {
                warn!(
                    has_token = partial.0.is_some(),
                    has_expiry = partial.1.is_some(),
                    has_user = partial.2.is_some(),
                    "Incomplete credential in storage, treating as absent"
                );
                self.repair().await;
                return Ok(None);
            }
        };

        let Some(expires_at) = parse_expiry(&expiry) else {
            warn!("Unreadable token expiry in storage, treating as absent");
            self.repair().await;
            return Ok(None);
        };

        let token_type = self
            .backend
            .get(TOKEN_TYPE_KEY)
            .await?
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());

        Ok(Some(TokenRecord {
            access_token,
            token_type,
            expires_at,
            user_id,
        }))
    }

    /// Remove every key. Idempotent.
    ///
    /// Every delete is attempted; the first failure is returned.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for key in RECORD_KEYS {
            if let Err(e) = self.backend.delete(key).await {
                warn!(key, error = %e, "Credential delete failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn repair(&self) {
        if let Err(e) = self.clear().await {
            warn!(error = %e, "Failed to clean up incomplete credential");
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
