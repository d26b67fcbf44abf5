//! Error taxonomy for the session lifecycle.
//!
//! Low-level failures ([`StoreError`], [`TransportError`]) are wrapped into
//! [`AuthError`] before they reach flow-level callers. Every type here is
//! `Clone` so a single refresh outcome can be handed to every waiter.

/// Failures reading or writing secure storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend I/O failure for a logical key.
    #[error("Secure storage I/O error for '{key}': {message}")]
    Io {
        /// Logical key being accessed.
        key: String,
        /// Error description.
        message: String,
    },

    /// A multi-key write stopped part way through.
    #[error("Partial write: '{key}' failed ({message})")]
    PartialWrite {
        /// The key whose write failed.
        key: String,
        /// Error description.
        message: String,
    },

    /// OS keychain failure.
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// Sealing or opening a stored value failed.
    #[error("Encryption error: {0}")]
    Crypto(String),
}

impl StoreError {
    /// Creates an I/O error for a logical key.
    #[must_use]
    pub fn io(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Failures executing an HTTP request through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The per-request timeout elapsed.
    #[error("Request timed out")]
    Timeout,

    /// Connection could not be established or was dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Normalized error message.
        message: String,
    },

    /// A 2xx body did not have the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built (bad URL, bad header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// HTTP status, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Failures reported by an identity provider bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The user dismissed the provider UI.
    #[error("Sign-in cancelled")]
    Cancelled,

    /// The provider cannot be used on this device.
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    /// The provider returned an error or an unusable credential.
    #[error("Identity provider failed: {0}")]
    Failed(String),
}

/// Caller-facing authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No stored session.
    #[error("No session")]
    NoSession,

    /// The stored session could not be brought back to a valid state.
    #[error("Session expired")]
    SessionExpired,

    /// Refresh failed; the session has been cleared.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The user dismissed the sign-in UI.
    #[error("Sign-in cancelled by user")]
    UserCancelled,

    /// The identity provider capability check failed.
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The identity provider failed after the UI was shown.
    #[error("Identity provider error: {0}")]
    IdentityFailed(String),

    /// The backend refused the credential exchange.
    #[error("Backend rejected sign-in ({status}): {message}")]
    BackendRejected {
        /// HTTP status code (0 if the body was unusable).
        status: u16,
        /// Normalized error message.
        message: String,
    },

    /// Secure storage failure that could not be recovered locally.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport failure that is not a backend rejection.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AuthError {
    /// Returns true if the caller should route the user back to sign-in.
    #[must_use]
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::NoSession | Self::SessionExpired | Self::RefreshFailed(_)
        )
    }

    /// Returns true if the error should not be surfaced to the user.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Cancelled => Self::UserCancelled,
            IdentityError::Unavailable(reason) => Self::ProviderUnavailable(reason),
            IdentityError::Failed(reason) => Self::IdentityFailed(reason),
        }
    }
}
