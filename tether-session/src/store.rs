//! Session state store.
//!
//! Single source of truth for who is logged in, with what credential,
//! until when. Dependents observe transitions through a `watch` channel of
//! [`SessionStatus`] and read the in-memory copy; nobody else touches the
//! persisted record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tether_core::{BearerToken, Session, SessionError, SessionStatus, Timestamp, UserIdentity};
use tokio::sync::{watch, Mutex};

use crate::persistence::SessionPersistence;

/// Holds the client's one session and broadcasts its status.
///
/// Writes are serialized: the in-memory session, the persisted record and
/// the broadcast status change together under one lock.
pub struct SessionStore {
    persistence: Arc<dyn SessionPersistence>,
    current: Mutex<Option<Session>>,
    epoch: AtomicU64,
    status: watch::Sender<SessionStatus>,
}

impl SessionStore {
    /// Create a store in the `Unknown` state.
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        let (status, _) = watch::channel(SessionStatus::Unknown);
        Self {
            persistence,
            current: Mutex::new(None),
            epoch: AtomicU64::new(0),
            status,
        }
    }

    /// Resolve `Unknown` from the persisted record.
    ///
    /// Runs once; later calls (or calls after a login or logout already
    /// resolved the state) return the current status unchanged.
    pub async fn restore(&self) -> SessionStatus {
        let mut current = self.current.lock().await;
        if self.status().is_resolved() {
            return self.status();
        }

        let loaded = match self.persistence.load().await {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load persisted session");
                None
            }
        };

        let next = match loaded {
            Some(session) if session.is_structurally_valid() => {
                let epoch = self.next_epoch();
                tracing::info!(
                    user_id = %session.identity.id,
                    expires_at = %session.expires_at,
                    epoch,
                    "Session restored"
                );
                *current = Some(session);
                SessionStatus::Authenticated { epoch }
            }
            Some(_) => {
                tracing::warn!("Persisted session is missing identity or token, discarding it");
                if let Err(err) = self.persistence.clear().await {
                    tracing::warn!(error = %err, "Failed to purge invalid session record");
                }
                SessionStatus::Unauthenticated
            }
            None => {
                tracing::info!("No persisted session");
                SessionStatus::Unauthenticated
            }
        };

        self.status.send_replace(next);
        next
    }

    /// Install a new session, persist it, and transition to
    /// `Authenticated`. Returns the new session epoch.
    pub async fn set_session(
        &self,
        identity: UserIdentity,
        token: BearerToken,
        expires_at: Timestamp,
    ) -> Result<u64, SessionError> {
        let session = Session::new(identity, token, expires_at);
        let mut current = self.current.lock().await;
        self.install(&mut current, session).await
    }

    /// Replace token and expiry, but only while the session the refresh
    /// started under is still current.
    ///
    /// Returns the new epoch, or `None` when the session changed in the
    /// meantime and the result was dropped.
    pub async fn apply_refresh(
        &self,
        started_under: u64,
        token: BearerToken,
        expires_at: Timestamp,
    ) -> Result<Option<u64>, SessionError> {
        let mut current = self.current.lock().await;
        if self.status().epoch() != Some(started_under) {
            tracing::debug!(started_under, "Session changed during refresh, result dropped");
            return Ok(None);
        }
        let Some(existing) = current.as_ref() else {
            return Ok(None);
        };
        let refreshed = existing.with_refreshed(token, expires_at);
        self.install(&mut current, refreshed).await.map(Some)
    }

    async fn install(
        &self,
        current: &mut Option<Session>,
        mut session: Session,
    ) -> Result<u64, SessionError> {
        if !session.is_structurally_valid() {
            return Err(SessionError::Invalid {
                reason: "identity id and token must be non-empty".to_string(),
            });
        }

        match self.persistence.save(&session).await {
            Ok(()) => session.persisted = true,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to persist session, keeping it in memory only");
            }
        }

        let epoch = self.next_epoch();
        tracing::info!(
            user_id = %session.identity.id,
            expires_at = %session.expires_at,
            epoch,
            "Session set"
        );
        *current = Some(session);
        self.status
            .send_replace(SessionStatus::Authenticated { epoch });
        Ok(epoch)
    }

    /// Purge the session and transition to `Unauthenticated`. Idempotent.
    pub async fn clear_session(&self) {
        let mut current = self.current.lock().await;
        self.clear_locked(&mut current).await;
    }

    async fn clear_locked(&self, current: &mut Option<Session>) {
        let had_session = current.take().is_some();

        if let Err(err) = self.persistence.clear().await {
            tracing::warn!(error = %err, "Failed to purge persisted session");
        }

        let epoch = self.next_epoch();
        let changed = self.status.send_if_modified(|status| {
            if *status == SessionStatus::Unauthenticated {
                false
            } else {
                *status = SessionStatus::Unauthenticated;
                true
            }
        });
        if had_session || changed {
            tracing::info!(epoch, "Session cleared");
        }
    }

    /// Clear the session because the remote authority rejected its
    /// credential.
    pub async fn handle_unauthorized(&self) {
        let mut current = self.current.lock().await;
        if self.status().is_authenticated() {
            tracing::warn!("Credential rejected by remote authority, forcing logout");
        }
        self.clear_locked(&mut current).await;
    }

    /// Like [`SessionStore::handle_unauthorized`], but only if the rejected
    /// credential belongs to the session of `epoch`. A rejection that
    /// arrives after a refresh or a new login is ignored.
    pub async fn handle_unauthorized_at(&self, epoch: u64) -> bool {
        let mut current = self.current.lock().await;
        if self.status().epoch() != Some(epoch) {
            tracing::debug!(epoch, "Rejected credential is no longer current, ignoring");
            return false;
        }
        tracing::warn!(epoch, "Credential rejected by remote authority, forcing logout");
        self.clear_locked(&mut current).await;
        true
    }

    /// The current bearer token with the epoch it belongs to. Request
    /// layer only.
    pub async fn get_credential(&self) -> Result<(BearerToken, u64), SessionError> {
        let current = self.current.lock().await;
        let epoch = self.status().epoch().ok_or(SessionError::NoSession)?;
        current
            .as_ref()
            .map(|session| (session.token().clone(), epoch))
            .ok_or(SessionError::NoSession)
    }

    /// The current bearer token. Request layer only.
    pub async fn get_token(&self) -> Result<BearerToken, SessionError> {
        self.with_session(|session| session.token().clone()).await
    }

    /// The current session expiry.
    pub async fn get_expiry(&self) -> Result<Timestamp, SessionError> {
        self.with_session(|session| session.expires_at).await
    }

    /// Identity of the logged-in user, if any.
    pub async fn identity(&self) -> Option<UserIdentity> {
        self.with_session(|session| session.identity.clone())
            .await
            .ok()
    }

    async fn with_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Result<T, SessionError> {
        let current = self.current.lock().await;
        if !self.status().is_authenticated() {
            return Err(SessionError::NoSession);
        }
        current.as_ref().map(f).ok_or(SessionError::NoSession)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Wait until the boot-time `Unknown` state has resolved.
    pub async fn resolved(&self) -> SessionStatus {
        let mut rx = self.subscribe();
        let resolved = rx.wait_for(|status| status.is_resolved()).await;
        match resolved {
            Ok(status) => *status,
            // The sender lives in `self`, so this is unreachable while
            // `self` is borrowed.
            Err(_) => self.status(),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}
