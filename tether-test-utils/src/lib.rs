//! tether Test Utilities
//!
//! Shared test infrastructure for the tether workspace:
//! - A scripted in-memory remote authority
//! - A navigator that records redirects
//! - Proptest generators
//! - Fixtures and assertions

pub use tether_core::{
    BearerToken, CacheKey, Category, Credentials, Email, EmailStatus, LoginResponse,
    MutationRequest, MutationResponse, RefreshedSession, RemoteAuthority, RemoteError,
    ResourceClass, SessionInfo, SessionStatus, Task, TetherError, TetherResult, UserIdentity,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tether_session::Navigator;
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// SCRIPTED REMOTE AUTHORITY
// ============================================================================

/// Remote authority endpoints, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    SessionInfo,
    Refresh,
    Logout,
    Fetch,
    Mutate,
}

struct Script {
    login: Result<LoginResponse, RemoteError>,
    session_info: Result<SessionInfo, RemoteError>,
    refresh_results: VecDeque<Result<RefreshedSession, RemoteError>>,
    refresh_lifetime: Duration,
    logout: Result<(), RemoteError>,
    collections: HashMap<CacheKey, Result<Value, RemoteError>>,
    mutation_results: VecDeque<Result<MutationResponse, RemoteError>>,
    reject_credentials: bool,
    calls: HashMap<Endpoint, usize>,
    fetched: Vec<CacheKey>,
    mutations: Vec<MutationRequest>,
}

/// In-memory remote authority with programmable responses.
///
/// Defaults: login succeeds as [`fixtures::identity`] with a one-hour
/// lifetime, refresh succeeds with a fresh token, collections answer with a
/// counter-stamped snapshot so a refetch is visible, and mutations are
/// acknowledged.
pub struct ScriptedRemote {
    script: Mutex<Script>,
    fetch_gate: Mutex<Option<Arc<Semaphore>>>,
    refresh_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                login: Ok(fixtures::login_response(Some(Duration::from_secs(3600)))),
                session_info: Ok(SessionInfo {
                    expires_in: Duration::from_secs(3600),
                }),
                refresh_results: VecDeque::new(),
                refresh_lifetime: Duration::from_secs(3600),
                logout: Ok(()),
                collections: HashMap::new(),
                mutation_results: VecDeque::new(),
                reject_credentials: false,
                calls: HashMap::new(),
                fetched: Vec::new(),
                mutations: Vec::new(),
            }),
            fetch_gate: Mutex::new(None),
            refresh_gate: Mutex::new(None),
        }
    }

    pub fn set_login(&self, result: Result<LoginResponse, RemoteError>) {
        lock(&self.script).login = result;
    }

    pub fn set_session_info(&self, result: Result<SessionInfo, RemoteError>) {
        lock(&self.script).session_info = result;
    }

    /// Queue one refresh result; once the queue is empty, refreshes succeed.
    pub fn push_refresh(&self, result: Result<RefreshedSession, RemoteError>) {
        lock(&self.script).refresh_results.push_back(result);
    }

    /// Lifetime handed out by default refreshes.
    pub fn set_refresh_lifetime(&self, lifetime: Duration) {
        lock(&self.script).refresh_lifetime = lifetime;
    }

    pub fn set_logout(&self, result: Result<(), RemoteError>) {
        lock(&self.script).logout = result;
    }

    /// Fix the snapshot answered for `key`.
    pub fn set_collection(&self, key: CacheKey, result: Result<Value, RemoteError>) {
        lock(&self.script).collections.insert(key, result);
    }

    /// Queue one mutation result; once the queue is empty, mutations are
    /// acknowledged.
    pub fn push_mutation(&self, result: Result<MutationResponse, RemoteError>) {
        lock(&self.script).mutation_results.push_back(result);
    }

    /// Answer every authenticated call with Unauthorized.
    pub fn reject_credentials(&self, reject: bool) {
        lock(&self.script).reject_credentials = reject;
    }

    /// Hold every fetch until [`ScriptedRemote::release_fetches`] lets it
    /// through.
    pub fn hold_fetches(&self) {
        *lock(&self.fetch_gate) = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_fetches(&self, count: usize) {
        if let Some(gate) = lock(&self.fetch_gate).as_ref() {
            gate.add_permits(count);
        }
    }

    /// Hold every refresh until [`ScriptedRemote::release_refreshes`] lets
    /// it through.
    pub fn hold_refreshes(&self) {
        *lock(&self.refresh_gate) = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_refreshes(&self, count: usize) {
        if let Some(gate) = lock(&self.refresh_gate).as_ref() {
            gate.add_permits(count);
        }
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        lock(&self.script).calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Number of fetches issued for one key.
    pub fn fetches_of(&self, key: &CacheKey) -> usize {
        lock(&self.script)
            .fetched
            .iter()
            .filter(|fetched| *fetched == key)
            .count()
    }

    /// Every mutation received, in order.
    pub fn mutations(&self) -> Vec<MutationRequest> {
        lock(&self.script).mutations.clone()
    }

    fn record(&self, endpoint: Endpoint) -> MutexGuard<'_, Script> {
        let mut script = lock(&self.script);
        *script.calls.entry(endpoint).or_insert(0) += 1;
        script
    }

    fn check_credentials(script: &Script, token: &BearerToken) -> Result<(), RemoteError> {
        if script.reject_credentials || token.is_empty() {
            Err(RemoteError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse, RemoteError> {
        self.record(Endpoint::Login).login.clone()
    }

    async fn session_info(&self, token: &BearerToken) -> Result<SessionInfo, RemoteError> {
        let script = self.record(Endpoint::SessionInfo);
        Self::check_credentials(&script, token)?;
        script.session_info.clone()
    }

    async fn refresh_session(&self, token: &BearerToken) -> Result<RefreshedSession, RemoteError> {
        let result = {
            let mut script = self.record(Endpoint::Refresh);
            Self::check_credentials(&script, token).and_then(|()| {
                if let Some(result) = script.refresh_results.pop_front() {
                    return result;
                }
                let n = script.calls.get(&Endpoint::Refresh).copied().unwrap_or(0);
                Ok(RefreshedSession {
                    token: BearerToken::new(format!("refreshed-{n}")),
                    expires_in: script.refresh_lifetime,
                })
            })
        };

        let gate = lock(&self.refresh_gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        result
    }

    async fn logout(&self, token: &BearerToken) -> Result<(), RemoteError> {
        let script = self.record(Endpoint::Logout);
        Self::check_credentials(&script, token)?;
        script.logout.clone()
    }

    async fn fetch_collection(
        &self,
        token: &BearerToken,
        key: &CacheKey,
    ) -> Result<Value, RemoteError> {
        let result = {
            let mut script = self.record(Endpoint::Fetch);
            script.fetched.push(key.clone());
            Self::check_credentials(&script, token).and_then(|()| {
                let n = script.fetched.iter().filter(|fetched| *fetched == key).count();
                script
                    .collections
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| Ok(json!({ "key": key.to_string(), "fetch": n })))
            })
        };

        let gate = lock(&self.fetch_gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        result
    }

    async fn mutate(
        &self,
        token: &BearerToken,
        request: &MutationRequest,
    ) -> Result<MutationResponse, RemoteError> {
        let mut script = self.record(Endpoint::Mutate);
        script.mutations.push(request.clone());
        Self::check_credentials(&script, token)?;
        script
            .mutation_results
            .pop_front()
            .unwrap_or(Ok(MutationResponse::Acknowledged))
    }
}

// ============================================================================
// RECORDING NAVIGATOR
// ============================================================================

/// Navigator that records every redirect.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirects(&self) -> Vec<String> {
        lock(&self.redirects).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.redirects).len()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, route: &str) {
        lock(&self.redirects).push(route.to_string());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tether types.

    use super::*;
    use proptest::prelude::*;

    /// One call against the session store.
    #[derive(Debug, Clone)]
    pub enum SessionOp {
        Set { token: String },
        Clear,
        Unauthorized,
    }

    pub fn arb_resource_class() -> impl Strategy<Value = ResourceClass> {
        prop_oneof![
            Just(ResourceClass::Categories),
            Just(ResourceClass::Emails),
            Just(ResourceClass::Email),
            Just(ResourceClass::Tasks),
            Just(ResourceClass::Task),
        ]
    }

    pub fn arb_param_value() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,12}"
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        (
            arb_resource_class(),
            proptest::collection::btree_map("[a-z]{1,8}", arb_param_value(), 0..3),
        )
            .prop_map(|(class, params)| {
                params
                    .into_iter()
                    .fold(CacheKey::new(class), |key, (name, value)| key.with_param(name, value))
            })
    }

    pub fn arb_identity() -> impl Strategy<Value = UserIdentity> {
        ("u-[a-z0-9]{1,8}", "[A-Za-z ]{1,16}", "[a-z]{1,8}@example\\.com")
            .prop_map(|(id, name, email)| UserIdentity::new(id, name, email))
    }

    pub fn arb_session_op() -> impl Strategy<Value = SessionOp> {
        prop_oneof![
            3 => "[a-zA-Z0-9]{0,12}".prop_map(|token| SessionOp::Set { token }),
            2 => Just(SessionOp::Clear),
            1 => Just(SessionOp::Unauthorized),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    pub fn identity() -> UserIdentity {
        UserIdentity::new("u-1", "Ada Lovelace", "ada@example.com")
    }

    pub fn credentials() -> Credentials {
        Credentials::new("ada@example.com", "correct horse battery staple")
    }

    pub fn login_response(expires_in: Option<Duration>) -> LoginResponse {
        LoginResponse {
            identity: identity(),
            token: BearerToken::new("token-1"),
            expires_in,
        }
    }

    pub fn category(name: &str) -> Category {
        Category {
            name: name.to_string(),
            description: None,
            email_count: 0,
        }
    }

    pub fn email(id: &str) -> Email {
        Email {
            id: id.to_string(),
            subject: format!("Subject of {id}"),
            from: "sender@example.com".to_string(),
            category: None,
            status: EmailStatus::default(),
        }
    }

    pub fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Follow up on {id}"),
            done: false,
            email_id: None,
        }
    }

    /// An email listing key for one category.
    pub fn email_listing(category: &str) -> CacheKey {
        CacheKey::new(ResourceClass::Emails).with_param("category", category)
    }

    pub fn categories_key() -> CacheKey {
        CacheKey::new(ResourceClass::Categories)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tether error classes.

    use super::*;

    #[track_caller]
    pub fn assert_unauthorized<T: std::fmt::Debug>(result: &TetherResult<T>) {
        match result {
            Err(err) if err.is_unauthorized() => {}
            other => panic!("Expected Unauthorized, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_no_session<T: std::fmt::Debug>(result: &TetherResult<T>) {
        match result {
            Err(err) if err.is_no_session() => {}
            other => panic!("Expected NoSession, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation<T: std::fmt::Debug>(result: &TetherResult<T>) {
        match result {
            Err(err) if err.is_validation() => {}
            other => panic!("Expected validation error, got: {:?}", other),
        }
    }
}
