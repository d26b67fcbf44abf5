use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::store::SealingKey;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// All overrides as a map of setting key (e.g. "api.mode") -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Which backend URL to talk to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiMode {
    Development,
    Production,
}

impl Default for ApiMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

impl std::fmt::Display for ApiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl FromStr for ApiMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(format!("Unknown api mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub mode: ApiMode,
    #[serde(default = "default_development_url")]
    pub development_url: String,
    #[serde(default = "default_production_url")]
    pub production_url: String,
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mode: ApiMode::default(),
            development_url: default_development_url(),
            production_url: default_production_url(),
            version_prefix: default_version_prefix(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Seconds taken off the expiry when checking validity.
    #[serde(default = "default_expiry_skew_secs")]
    pub expiry_skew_secs: u64,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    #[serde(default = "default_me_path")]
    pub me_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_skew_secs: default_expiry_skew_secs(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            logout_path: default_logout_path(),
            me_path: default_me_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyring => write!(f, "keyring"),
            Self::File => write!(f, "file"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for the file backend.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    /// Keyring service name.
    #[serde(default = "default_keyring_service")]
    pub service: String,
    /// Base64 AES-256 key for the file backend.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: default_storage_dir(),
            service: default_keyring_service(),
            encryption_key: None,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("dir", &self.dir)
            .field("service", &self.service)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_development_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_production_url() -> String {
    "https://api.example.com".to_string()
}
fn default_version_prefix() -> String {
    crate::net::client::API_PREFIX.to_string()
}
const fn default_timeout_ms() -> u64 {
    10_000
}
const fn default_connect_timeout_ms() -> u64 {
    10_000
}
const fn default_expiry_skew_secs() -> u64 {
    300
}
fn default_refresh_path() -> String {
    crate::session::manager::DEFAULT_REFRESH_PATH.to_string()
}
fn default_login_path() -> String {
    "/auth/apple".to_string()
}
fn default_logout_path() -> String {
    "/auth/logout".to_string()
}
fn default_me_path() -> String {
    "/auth/me".to_string()
}
fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("authsession")
        .join("credentials")
}
fn default_keyring_service() -> String {
    "authsession".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading, env overrides, validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `AUTHSESSION_` takes precedence
    /// over the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Backend origin for the current mode.
    pub fn base_url(&self) -> &str {
        match self.api.mode {
            ApiMode::Development => &self.api.development_url,
            ApiMode::Production => &self.api.production_url,
        }
    }

    /// Reject settings that would only fail later at request or storage time.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(self.base_url())
            .map_err(|e| anyhow::anyhow!("Invalid {} url '{}': {e}", self.api.mode, self.base_url()))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Backend url must be http or https, got '{}'", url.scheme());
        }
        if self.api.timeout_ms == 0 {
            anyhow::bail!("api.timeout_ms must be greater than zero");
        }
        for (key, path) in [
            ("session.refresh_path", &self.session.refresh_path),
            ("session.login_path", &self.session.login_path),
            ("session.logout_path", &self.session.logout_path),
            ("session.me_path", &self.session.me_path),
        ] {
            if path.trim().is_empty() {
                anyhow::bail!("{key} must not be empty");
            }
        }
        if self.storage.backend == StorageBackend::File {
            let key = self.storage.encryption_key.as_deref().ok_or_else(|| {
                anyhow::anyhow!("storage.encryption_key is required for the file backend")
            })?;
            SealingKey::from_base64(key)?;
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every supported setting has a corresponding `AUTHSESSION_*` env var.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- Api --
        env_parse!("api.mode", "AUTHSESSION_API_MODE", self.api.mode);
        env_str!(
            "api.development_url",
            "AUTHSESSION_API_DEVELOPMENT_URL",
            self.api.development_url
        );
        env_str!(
            "api.production_url",
            "AUTHSESSION_API_PRODUCTION_URL",
            self.api.production_url
        );
        env_str!(
            "api.version_prefix",
            "AUTHSESSION_API_VERSION_PREFIX",
            self.api.version_prefix
        );
        env_parse!("api.timeout_ms", "AUTHSESSION_API_TIMEOUT_MS", self.api.timeout_ms);
        env_parse!(
            "api.connect_timeout_ms",
            "AUTHSESSION_API_CONNECT_TIMEOUT_MS",
            self.api.connect_timeout_ms
        );

        // -- Session --
        env_parse!(
            "session.expiry_skew_secs",
            "AUTHSESSION_SESSION_EXPIRY_SKEW_SECS",
            self.session.expiry_skew_secs
        );
        env_str!(
            "session.refresh_path",
            "AUTHSESSION_SESSION_REFRESH_PATH",
            self.session.refresh_path
        );
        env_str!(
            "session.login_path",
            "AUTHSESSION_SESSION_LOGIN_PATH",
            self.session.login_path
        );
        env_str!(
            "session.logout_path",
            "AUTHSESSION_SESSION_LOGOUT_PATH",
            self.session.logout_path
        );
        env_str!("session.me_path", "AUTHSESSION_SESSION_ME_PATH", self.session.me_path);

        // -- Storage --
        env_parse!(
            "storage.backend",
            "AUTHSESSION_STORAGE_BACKEND",
            self.storage.backend
        );
        env_path!("storage.dir", "AUTHSESSION_STORAGE_DIR", self.storage.dir);
        env_str!(
            "storage.service",
            "AUTHSESSION_STORAGE_SERVICE",
            self.storage.service
        );
        env_opt_str!(
            "storage.encryption_key",
            "AUTHSESSION_STORAGE_ENCRYPTION_KEY",
            self.storage.encryption_key
        );

        // -- Logging --
        env_str!("logging.level", "AUTHSESSION_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "AUTHSESSION_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// Helper for default storage directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
