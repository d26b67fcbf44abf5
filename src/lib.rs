//! Session credential lifecycle for a client of a token-authenticated
//! backend.
//!
//! - [`store`] persists the token record in platform secure storage.
//! - [`net`] sends requests with the current bearer token.
//! - [`session`] decides validity, refreshes once per expiry, and clears the
//!   session when a refresh fails.
//! - [`flow`] runs sign-in through an [`identity::IdentityBridge`] and
//!   sign-out.

pub mod config;
pub mod error;
pub mod flow;
pub mod identity;
pub mod models;
pub mod net;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::{AuthError, IdentityError, StoreError, TransportError};
pub use flow::{AuthFlow, FlowPaths};
pub use identity::{IdentityBridge, ProviderCredential, StaticIdentityBridge};
pub use net::HttpGateway;
pub use session::{SessionGrant, SessionManager, SessionOptions, SessionState, SessionStatus, TokenRecord};
pub use store::{CredentialStore, SecureBackend};
