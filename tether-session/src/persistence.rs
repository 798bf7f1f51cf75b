//! Persisted session record.
//!
//! One record, holding `{identity, token, expiresAt}`. Only the session
//! store reads or writes it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_core::{BearerToken, Session, SessionError, Timestamp, UserIdentity};
use tokio::sync::Mutex;

/// Storage for the single persisted session record.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Load the record. A missing or unreadable record is `Ok(None)`.
    async fn load(&self) -> Result<Option<Session>, SessionError>;

    /// Overwrite the record.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Erase the record. Succeeds when there is nothing to erase.
    async fn clear(&self) -> Result<(), SessionError>;
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    identity: UserIdentity,
    token: String,
    expires_at: Timestamp,
}

impl SessionRecord {
    fn from_session(session: &Session) -> Self {
        Self {
            identity: session.identity.clone(),
            token: session.token().expose().to_string(),
            expires_at: session.expires_at,
        }
    }

    fn into_session(self) -> Session {
        let mut session = Session::new(self.identity, BearerToken::new(self.token), self.expires_at);
        session.persisted = true;
        session
    }
}

fn persistence_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Persistence {
        reason: err.to_string(),
    }
}

/// JSON file persistence.
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionPersistence for FileSessionPersistence {
    async fn load(&self) -> Result<Option<Session>, SessionError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(persistence_error(err)),
        };

        match serde_json::from_str::<SessionRecord>(&contents) {
            Ok(record) => Ok(Some(record.into_session())),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Persisted session record is corrupt, ignoring it"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(persistence_error)?;
            }
        }
        let contents = serde_json::to_string_pretty(&SessionRecord::from_session(session))
            .map_err(persistence_error)?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(persistence_error)
    }

    async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence_error(err)),
        }
    }
}

/// In-memory persistence, for tests and for callers that opt out of
/// persisting sessions.
#[derive(Default)]
pub struct MemorySessionPersistence {
    record: Mutex<Option<Session>>,
}

impl MemorySessionPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a record already stored, as if left by a previous run.
    pub fn with_session(session: Session) -> Self {
        Self {
            record: Mutex::new(Some(session)),
        }
    }

    pub async fn stored(&self) -> Option<Session> {
        self.record.lock().await.clone()
    }
}

#[async_trait]
impl SessionPersistence for MemorySessionPersistence {
    async fn load(&self) -> Result<Option<Session>, SessionError> {
        let mut session = self.record.lock().await.clone();
        if let Some(session) = session.as_mut() {
            session.persisted = true;
        }
        Ok(session)
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        *self.record.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        *self.record.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_session() -> Session {
        Session::new(
            UserIdentity::new("u-1", "Ada", "ada@example.com"),
            BearerToken::new("tok-123"),
            Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_file_persistence_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileSessionPersistence::new(dir.path().join("nested").join("session.json"));

        assert!(persistence.load().await.unwrap().is_none());

        persistence.save(&sample_session()).await.unwrap();
        let loaded = persistence.load().await.unwrap().expect("record");
        assert_eq!(loaded.identity.id, "u-1");
        assert_eq!(loaded.token().expose(), "tok-123");
        assert!(loaded.persisted);

        persistence.clear().await.unwrap();
        assert!(persistence.load().await.unwrap().is_none());
        // Clearing twice is fine.
        persistence.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_record_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let persistence = FileSessionPersistence::new(&path);
        persistence.save(&sample_session()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("expiresAt"));
        assert!(raw.contains("tok-123"));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let persistence = FileSessionPersistence::new(&path);
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_persistence_marks_loaded_sessions() {
        let persistence = MemorySessionPersistence::with_session(sample_session());
        let loaded = persistence.load().await.unwrap().unwrap();
        assert!(loaded.persisted);

        persistence.clear().await.unwrap();
        assert!(persistence.stored().await.is_none());
    }
}
