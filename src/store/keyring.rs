use async_trait::async_trait;
use tracing::instrument;

use super::SecureBackend;
use crate::error::StoreError;

/// Platform secure storage via the system keyring.
///
/// One entry per logical key under a shared service name.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringBackend {
    /// Default keyring service name.
    pub const SERVICE_NAME: &str = "authsession";

    pub fn new() -> Self {
        Self::with_service(Self::SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Run a synchronous keyring call for `key` on the blocking pool.
    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> Result<T, StoreError> + Send + 'static,
    {
        let service = self.service.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || op(open_entry(&service, &owned_key)?))
            .await
            .map_err(|e| StoreError::Keyring(format!("Keyring task for '{key}' failed: {e}")))?
    }
}

fn open_entry(service: &str, key: &str) -> Result<keyring::Entry, StoreError> {
    keyring::Entry::new(service, key)
        .map_err(|e| StoreError::Keyring(format!("Failed to open entry '{key}': {e}")))
}

#[async_trait]
impl SecureBackend for KeyringBackend {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.blocking(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        })
        .await
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.blocking(key, move |entry| {
            entry
                .set_password(&value)
                .map_err(|e| StoreError::Keyring(e.to_string()))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blocking(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        })
        .await
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
