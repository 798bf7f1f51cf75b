//! Client context.
//!
//! Owns one session store, one cache, one refresh scheduler and one
//! mutation coordinator, wired together. Components that need session or
//! cache state are handed the context (or a piece of it); nothing is global.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tether_cache::{CacheConfig, CacheRead, ReadPolicy, RemoteCache};
use tether_core::{
    expires_at_from, CacheKey, Credentials, RemoteAuthority, SessionStatus, TetherResult,
    UserIdentity,
};
use tether_session::{
    FileSessionPersistence, Navigator, RefreshPolicy, RefreshScheduler, RouteGuard,
    SessionPersistence, SessionStore,
};
use tokio::task::JoinHandle;

use crate::config::TetherConfig;
use crate::http::HttpRemote;
use crate::mutation::MutationCoordinator;
use crate::request::AuthorizedRemote;

/// Construction knobs for [`ClientContext`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub refresh: RefreshPolicy,
    pub cache: CacheConfig,
    pub login_route: String,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            refresh: RefreshPolicy::default(),
            cache: CacheConfig::default(),
            login_route: "/login".to_string(),
        }
    }
}

pub struct ClientContext {
    store: Arc<SessionStore>,
    remote: Arc<dyn RemoteAuthority>,
    cache: RemoteCache<AuthorizedRemote>,
    scheduler: RefreshScheduler,
    mutations: MutationCoordinator,
    login_route: String,
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

impl ClientContext {
    pub fn new(
        remote: Arc<dyn RemoteAuthority>,
        persistence: Arc<dyn SessionPersistence>,
        options: ContextOptions,
    ) -> Self {
        let store = Arc::new(SessionStore::new(persistence));
        let authorized = Arc::new(AuthorizedRemote::new(store.clone(), remote.clone()));
        let cache = RemoteCache::new(authorized, options.cache);
        let scheduler = RefreshScheduler::new(store.clone(), remote.clone(), options.refresh);
        let mutations = MutationCoordinator::new(cache.clone());

        Self {
            store,
            remote,
            cache,
            scheduler,
            mutations,
            login_route: options.login_route,
            lifecycle: Mutex::new(None),
        }
    }

    /// Build a context talking HTTP and persisting to a file.
    pub fn from_config(config: &TetherConfig) -> TetherResult<Self> {
        let remote = HttpRemote::new(&config.api_base_url, config.request_timeout())?;
        let persistence = FileSessionPersistence::new(config.session_path.clone());
        let options = ContextOptions {
            refresh: config.refresh_policy(),
            cache: config.cache_config(),
            login_route: config.login_route.clone(),
        };
        Ok(Self::new(Arc::new(remote), Arc::new(persistence), options))
    }

    /// Start background work and resolve the boot-time session.
    pub async fn initialize(&self) -> SessionStatus {
        self.scheduler.start();
        self.watch_lifecycle();
        let status = self.store.restore().await;
        tracing::info!(status = ?status, "Client context initialized");
        status
    }

    /// Stop background work. The session record is left as is.
    pub fn dispose(&self) {
        self.scheduler.shutdown();
        if let Some(handle) = self
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
        tracing::info!("Client context disposed");
    }

    /// Tear the cache down whenever the session ends, however it ended.
    fn watch_lifecycle(&self) {
        let mut slot = self
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return;
        }

        let cache = self.cache.clone();
        let mut status_rx = self.store.subscribe();
        *slot = Some(tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                if status == SessionStatus::Unauthenticated {
                    let evicted = cache.clear().await;
                    tracing::debug!(evicted, "Cache torn down after session end");
                }
            }
        }));
    }

    /// Authenticate and install the new session.
    ///
    /// When the login response carries no lifetime, it is read from the
    /// session-info endpoint. Nothing changes locally unless every step
    /// succeeds. Signing in as a different user tears the cache down.
    pub async fn login(&self, credentials: &Credentials) -> TetherResult<UserIdentity> {
        let previous = self.store.identity().await;
        let response = self.remote.login(credentials).await?;
        let expires_in = match response.expires_in {
            Some(expires_in) => expires_in,
            None => self.remote.session_info(&response.token).await?.expires_in,
        };
        let expires_at = expires_at_from(Utc::now(), expires_in);

        let epoch = self
            .store
            .set_session(response.identity.clone(), response.token, expires_at)
            .await?;
        // Cleared after the new session is installed, so fetches still
        // running under the old credential find no entry to commit into.
        if let Some(previous) = previous.filter(|previous| previous.id != response.identity.id) {
            let evicted = self.cache.clear().await;
            tracing::info!(previous_user = %previous.id, evicted, "User switched, cache torn down");
        }
        tracing::info!(user_id = %response.identity.id, epoch, "Logged in");
        Ok(response.identity)
    }

    /// End the session. The remote call is best effort; local state is
    /// always cleared.
    pub async fn logout(&self) {
        if let Ok(token) = self.store.get_token().await {
            if let Err(err) = self.remote.logout(&token).await {
                tracing::warn!(error = %err, "Remote logout failed, clearing locally");
            }
        }
        self.store.clear_session().await;
        self.scheduler.cancel();
        let evicted = self.cache.clear().await;
        tracing::info!(evicted, "Logged out");
    }

    pub fn route_guard(&self, navigator: Arc<dyn Navigator>) -> RouteGuard {
        RouteGuard::new(self.store.subscribe(), navigator, self.login_route.clone())
    }

    pub async fn read<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        policy: ReadPolicy,
    ) -> TetherResult<CacheRead<T>> {
        Ok(self.cache.read_as(key, policy).await?)
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn cache(&self) -> &RemoteCache<AuthorizedRemote> {
        &self.cache
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        self.dispose();
    }
}
