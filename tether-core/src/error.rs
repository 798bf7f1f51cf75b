//! Error types for tether operations

use thiserror::Error;

/// Malformed input, detected locally or reported by the remote authority.
/// Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Rejected by remote authority: {reason}")]
    Rejected { reason: String },
}

/// Session store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No active session")]
    NoSession,

    #[error("Session rejected by remote authority")]
    Unauthorized,

    #[error("Session persistence failed: {reason}")]
    Persistence { reason: String },

    #[error("Invalid session: {reason}")]
    Invalid { reason: String },
}

/// Errors surfaced by calls to the remote authority.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Credential rejected by remote authority")]
    Unauthorized,

    #[error("Remote call did not complete: {reason}")]
    Transient { reason: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unexpected response: {reason}")]
    InvalidResponse { reason: String },
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Fetch failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("No active session")]
    NoSession,

    #[error("Fetch for {key} was aborted before completing")]
    FetchAborted { key: String },

    #[error("Cached value for {key} could not be decoded: {reason}")]
    Decode { key: String, reason: String },

    #[error("Value for {key} could not be encoded: {reason}")]
    Encode { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TETHER_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all tether errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TetherError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TetherError {
    /// True for errors that must force the session to be cleared.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            TetherError::Session(SessionError::Unauthorized)
                | TetherError::Remote(RemoteError::Unauthorized)
                | TetherError::Cache(CacheError::Remote(RemoteError::Unauthorized))
        )
    }

    /// True when the operation was attempted without an active session.
    pub fn is_no_session(&self) -> bool {
        matches!(
            self,
            TetherError::Session(SessionError::NoSession) | TetherError::Cache(CacheError::NoSession)
        )
    }

    /// True for failures to complete a call that may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TetherError::Remote(RemoteError::Transient { .. })
                | TetherError::Cache(CacheError::Remote(RemoteError::Transient { .. }))
                | TetherError::Cache(CacheError::FetchAborted { .. })
        )
    }

    /// True for malformed input; these are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TetherError::Validation(_)
                | TetherError::Remote(RemoteError::Validation(_))
                | TetherError::Cache(CacheError::Remote(RemoteError::Validation(_)))
        )
    }
}

impl RemoteError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }
}

/// Result type alias for tether operations.
pub type TetherResult<T> = Result<T, TetherError>;

// =============================================================================
// TESTS
// =============================================================================
