//! Token record and expiry arithmetic.
//!
//! A [`TokenRecord`] always carries an absolute expiry. Durations only exist
//! at the edges: in the backend's `expires_in` and in the [`SessionGrant`]
//! handed to the manager after sign-in.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token type assumed when the backend or storage omits one.
pub const DEFAULT_TOKEN_TYPE: &str = "bearer";

/// Safety buffer subtracted from the expiry when deciding validity (5 minutes).
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(300);

/// The persisted session credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque bearer token.
    pub access_token: String,
    /// Token type reported by the backend, typically "bearer".
    pub token_type: String,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
    /// External identity this token belongs to.
    pub user_id: String,
}

impl TokenRecord {
    /// Build a record from a relative lifetime, anchored at `now`.
    pub fn issue(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: i64,
        user_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = ChronoDuration::try_seconds(expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(if expires_in < 0 {
                now
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at,
            user_id: user_id.into(),
        }
    }

    /// Whether the token is usable at `now` once `skew` is taken off its expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(skew_delta(skew))
            .is_some_and(|edge| now < edge)
    }

    /// Whether the token is past its real expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before the real expiry, zero if already expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Expiry as epoch milliseconds, the stored representation.
    pub fn expires_at_millis(&self) -> i64 {
        self.expires_at.timestamp_millis()
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Result of a successful credential exchange, before it is anchored in time.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    pub user_id: String,
}

impl SessionGrant {
    /// Anchor the grant at `now`.
    pub fn into_record(self, now: DateTime<Utc>) -> TokenRecord {
        TokenRecord::issue(
            self.access_token,
            self.token_type,
            self.expires_in,
            self.user_id,
            now,
        )
    }
}

impl std::fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGrant")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("user_id", &self.user_id)
            .finish()
    }
}

fn skew_delta(skew: Duration) -> ChronoDuration {
    ChronoDuration::from_std(skew).unwrap_or(ChronoDuration::MAX)
}
