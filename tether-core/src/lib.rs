//! tether Core - Data Types and Contracts
//!
//! Pure data structures shared by every other crate: identities and
//! sessions, resource classes and cache keys, the error taxonomy, and the
//! abstract remote-authority contract. No state, no I/O.

pub mod error;
pub mod identity;
pub mod remote;
pub mod resource;

pub use error::{
    CacheError, ConfigError, RemoteError, SessionError, TetherError, TetherResult,
    ValidationError,
};
pub use identity::{expires_at_from, BearerToken, Session, SessionStatus, Timestamp, UserIdentity};
pub use remote::{
    Credentials, LoginResponse, MutationOp, MutationRequest, MutationResponse, RefreshedSession,
    RemoteAuthority, SessionInfo,
};
pub use resource::{
    CacheKey, Category, Email, EmailStatus, Page, ResourceClass, Task, ENTITY_ID_PARAM,
};

use uuid::Uuid;

/// Correlation identifier for one mutation call (UUIDv7, time-sortable).
pub type MutationId = Uuid;

/// Generate a new UUIDv7 mutation id.
pub fn new_mutation_id() -> MutationId {
    Uuid::now_v7()
}
