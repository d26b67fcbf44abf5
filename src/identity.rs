//! Identity provider seam.
//!
//! The provider's own UI is outside this crate; a bridge only reports what
//! the provider produced.

use async_trait::async_trait;

use crate::error::IdentityError;
use crate::models::PersonName;

/// Output of a completed provider sign-in.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    /// Stable user id assigned by the provider.
    pub external_id: String,
    pub email: Option<String>,
    pub full_name: Option<PersonName>,
    /// Signed identity token to exchange with the backend.
    pub identity_token: String,
    pub authorization_code: Option<String>,
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("external_id", &self.external_id)
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("identity_token", &"<redacted>")
            .field(
                "authorization_code",
                &self.authorization_code.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A third-party sign-in provider.
#[async_trait]
pub trait IdentityBridge: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Capability check. `false` means the provider cannot be offered.
    async fn is_available(&self) -> bool;

    /// Run the provider sign-in.
    async fn sign_in(&self) -> Result<ProviderCredential, IdentityError>;
}

/// Bridge that returns a fixed outcome.
///
/// Used when the credential was obtained out of band (the CLI) and in tests.
#[derive(Debug, Clone)]
pub struct StaticIdentityBridge {
    name: String,
    available: bool,
    outcome: Result<ProviderCredential, IdentityError>,
}

impl StaticIdentityBridge {
    /// Bridge yielding `credential`.
    pub fn new(credential: ProviderCredential) -> Self {
        Self {
            name: "static".to_string(),
            available: true,
            outcome: Ok(credential),
        }
    }

    /// Bridge whose sign-in fails with `error`.
    pub fn failing(error: IdentityError) -> Self {
        Self {
            name: "static".to_string(),
            available: true,
            outcome: Err(error),
        }
    }

    /// Bridge that fails its capability check.
    pub fn unavailable() -> Self {
        Self {
            name: "static".to_string(),
            available: false,
            outcome: Err(IdentityError::Unavailable(
                "provider not available".to_string(),
            )),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl IdentityBridge for StaticIdentityBridge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn sign_in(&self) -> Result<ProviderCredential, IdentityError> {
        self.outcome.clone()
    }
}
