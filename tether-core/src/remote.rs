//! The abstract remote-authority contract consumed by the core.
//!
//! The contract is transport-agnostic. `tether-client` provides the HTTP
//! implementation; tests script it in memory.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

use crate::error::{RemoteError, ValidationError};
use crate::identity::{BearerToken, UserIdentity};
use crate::resource::{CacheKey, ResourceClass};

/// Login credentials. The password never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        let password: String = password.into();
        Self {
            email: email.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Expose the password (transport only).
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub identity: UserIdentity,
    pub token: BearerToken,
    /// Some backends omit the lifetime; it is then read from session-info.
    pub expires_in: Option<Duration>,
}

/// `GET session-info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub expires_in: Duration,
}

/// `POST refresh-session`
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub token: BearerToken,
    pub expires_in: Duration,
}

/// Kind of remote mutation. Maps onto POST, PUT, PATCH and DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    Create,
    Replace,
    Patch,
    Delete,
    /// PATCH against a whole collection, e.g. bulk recategorization.
    BulkPatch,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Replace => "replace",
            MutationOp::Patch => "patch",
            MutationOp::Delete => "delete",
            MutationOp::BulkPatch => "bulk_patch",
        }
    }

    pub fn requires_id(&self) -> bool {
        !matches!(self, MutationOp::Create | MutationOp::BulkPatch)
    }

    pub fn requires_body(&self) -> bool {
        !matches!(self, MutationOp::Delete)
    }
}

/// `mutate-resource(class, id, op)`
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub class: ResourceClass,
    pub id: Option<String>,
    pub op: MutationOp,
    pub body: Option<Value>,
}

impl MutationRequest {
    pub fn create(class: ResourceClass, body: Value) -> Self {
        Self {
            class,
            id: None,
            op: MutationOp::Create,
            body: Some(body),
        }
    }

    pub fn replace(class: ResourceClass, id: impl Into<String>, body: Value) -> Self {
        Self {
            class,
            id: Some(id.into()),
            op: MutationOp::Replace,
            body: Some(body),
        }
    }

    pub fn patch(class: ResourceClass, id: impl Into<String>, body: Value) -> Self {
        Self {
            class,
            id: Some(id.into()),
            op: MutationOp::Patch,
            body: Some(body),
        }
    }

    pub fn bulk_patch(class: ResourceClass, body: Value) -> Self {
        Self {
            class,
            id: None,
            op: MutationOp::BulkPatch,
            body: Some(body),
        }
    }

    pub fn delete(class: ResourceClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: Some(id.into()),
            op: MutationOp::Delete,
            body: None,
        }
    }

    /// Check the request shape before it is sent anywhere.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.op.requires_id() {
            match self.id.as_deref() {
                None => {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "id".to_string(),
                    })
                }
                Some(id) if id.trim().is_empty() => {
                    return Err(ValidationError::InvalidValue {
                        field: "id".to_string(),
                        reason: "must not be empty".to_string(),
                    })
                }
                Some(id) if id.contains('/') => {
                    return Err(ValidationError::InvalidValue {
                        field: "id".to_string(),
                        reason: "must not contain '/'".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        if self.op.requires_body() {
            match &self.body {
                Some(Value::Object(_)) => {}
                Some(_) => {
                    return Err(ValidationError::InvalidValue {
                        field: "body".to_string(),
                        reason: "must be a JSON object".to_string(),
                    })
                }
                None => {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "body".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Cache key of the entity this request targets, when it has one.
    pub fn entity_key(&self) -> Option<CacheKey> {
        self.id
            .as_ref()
            .map(|id| CacheKey::entity(self.class, id.clone()))
    }
}

/// What the remote authority answered to a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResponse {
    /// The full updated entity; safe to write straight into the cache.
    Entity(Value),
    /// An entity that is known to be incomplete.
    Partial(Value),
    /// A plain acknowledgment with no body.
    Acknowledged,
}

/// Transport-agnostic remote authority.
///
/// Every method except `login` carries the current bearer token. A
/// rejected or missing credential is reported as
/// [`RemoteError::Unauthorized`].
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, RemoteError>;

    async fn session_info(&self, token: &BearerToken) -> Result<SessionInfo, RemoteError>;

    async fn refresh_session(&self, token: &BearerToken) -> Result<RefreshedSession, RemoteError>;

    /// Idempotent on the remote side.
    async fn logout(&self, token: &BearerToken) -> Result<(), RemoteError>;

    async fn fetch_collection(
        &self,
        token: &BearerToken,
        key: &CacheKey,
    ) -> Result<Value, RemoteError>;

    async fn mutate(
        &self,
        token: &BearerToken,
        request: &MutationRequest,
    ) -> Result<MutationResponse, RemoteError>;
}
