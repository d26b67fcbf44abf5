use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::instrument;

use super::SecureBackend;
use super::cipher::SealingKey;
use crate::error::StoreError;

/// File permissions for credential files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Sealed file backend.
///
/// Each logical key is one file at `{dir}/{key}.sealed` holding the
/// AES-256-GCM sealed value. Writes go to a temp file that is synced and
/// renamed into place.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    key: SealingKey,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>, key: SealingKey) -> Self {
        Self {
            dir: dir.into(),
            key,
        }
    }

    /// Directory holding the sealed files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.sealed"))
    }

    fn ensure_dir(&self, key: &str) -> Result<(), StoreError> {
        if self.dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::io(
                key,
                format!("Failed to create directory '{}': {e}", self.dir.display()),
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                StoreError::io(
                    key,
                    format!(
                        "Failed to set directory permissions on '{}': {e}",
                        self.dir.display()
                    ),
                )
            })?;
        }
        Ok(())
    }

    fn read_blocking(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::io(
                    key,
                    format!("Failed to read '{}': {e}", path.display()),
                ));
            }
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        self.key.open(&content).map(Some)
    }

    fn write_blocking(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_dir(key)?;

        let path = self.key_path(key);
        let sealed = self.key.seal(value)?;
        let temp_path = path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| {
                    StoreError::io(
                        key,
                        format!("Failed to create temp file '{}': {e}", temp_path.display()),
                    )
                })?;
            file.write_all(sealed.as_bytes()).map_err(|e| {
                StoreError::io(
                    key,
                    format!("Failed to write temp file '{}': {e}", temp_path.display()),
                )
            })?;
            file.sync_all().map_err(|e| {
                StoreError::io(
                    key,
                    format!("Failed to sync temp file '{}': {e}", temp_path.display()),
                )
            })?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, &sealed).map_err(|e| {
                StoreError::io(
                    key,
                    format!("Failed to write temp file '{}': {e}", temp_path.display()),
                )
            })?;
        }

        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::io(
                key,
                format!(
                    "Failed to rename '{}' to '{}': {e}",
                    temp_path.display(),
                    path.display()
                ),
            ));
        }
        Ok(())
    }

    fn delete_blocking(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(
                key,
                format!("Failed to remove '{}': {e}", path.display()),
            )),
        }
    }

    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&FileBackend, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let this = self.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || op(&this, &owned_key))
            .await
            .map_err(|e| StoreError::io(key, format!("Storage task failed: {e}")))?
    }
}

#[async_trait]
impl SecureBackend for FileBackend {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.blocking(key, |this, key| this.read_blocking(key)).await
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.blocking(key, move |this, key| this.write_blocking(key, &value))
            .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blocking(key, |this, key| this.delete_blocking(key))
            .await
    }

    fn name(&self) -> &str {
        "file"
    }
}
