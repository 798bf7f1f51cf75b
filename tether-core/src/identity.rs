//! Identity and session types for tether.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// The user an authenticated session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// An identity is usable only when it carries a non-empty id.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Opaque bearer credential presented on every authenticated call.
///
/// Wraps the raw token in a `secrecy::SecretString` so it never ends up in
/// logs or `Debug` output. Only the request layer and the session store
/// should ever call [`BearerToken::expose`].
#[derive(Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self(SecretString::new(token.into()))
    }

    /// Expose the raw token (request layer and persistence only).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Length of the token without exposing it.
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    /// Check if the token is empty without exposing it.
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BearerToken([REDACTED, {} chars])", self.len())
    }
}

impl PartialEq for BearerToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for BearerToken {}

/// The single authenticated session a client may hold.
///
/// A session is replaced wholesale: login and boot restore create it, a
/// refresh swaps token and expiry, logout or an Unauthorized signal
/// destroys it. It is never partially mutated otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: UserIdentity,
    token: BearerToken,
    pub expires_at: Timestamp,
    /// Whether the record has been written to persistent storage.
    pub persisted: bool,
}

impl Session {
    pub fn new(identity: UserIdentity, token: BearerToken, expires_at: Timestamp) -> Self {
        Self {
            identity,
            token,
            expires_at,
            persisted: false,
        }
    }

    pub fn token(&self) -> &BearerToken {
        &self.token
    }

    /// Structural validity: non-empty identity and token.
    pub fn is_structurally_valid(&self) -> bool {
        self.identity.is_valid() && !self.token.is_empty()
    }

    /// Remaining lifetime relative to `now`. Negative when already expired.
    pub fn remaining_at(&self, now: Timestamp) -> ChronoDuration {
        self.expires_at.signed_duration_since(now)
    }

    /// Replace token and expiry, keeping the identity.
    pub fn with_refreshed(&self, token: BearerToken, expires_at: Timestamp) -> Self {
        Self {
            identity: self.identity.clone(),
            token,
            expires_at,
            persisted: false,
        }
    }
}

/// Compute an absolute expiry from a relative lifetime.
pub fn expires_at_from(now: Timestamp, expires_in: Duration) -> Timestamp {
    let lifetime = ChronoDuration::from_std(expires_in).unwrap_or(ChronoDuration::MAX);
    now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Authentication state as observed by dependents of the session store.
///
/// `Unknown` is the boot state and resolves exactly once. Every
/// `setSession` produces a new `epoch`, so a refresh landing after a
/// logout or a re-login can be told apart from the session it started
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Unknown,
    Authenticated { epoch: u64 },
    Unauthenticated,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Authenticated { epoch } => Some(*epoch),
            _ => None,
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Unknown
    }
}
