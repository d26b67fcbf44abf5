//! Session credential model and lifecycle manager.

pub mod manager;
pub mod token;

pub use manager::{SessionManager, SessionOptions, SessionState, SessionStatus};
pub use token::{SessionGrant, TokenRecord};
