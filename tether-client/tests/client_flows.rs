//! Client context flows: login, logout, forced logout, and mutation
//! reconciliation against a scripted remote.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tether_cache::ReadPolicy;
use tether_client::{ClientContext, ContextOptions};
use tether_core::{
    BearerToken, CacheKey, EmailStatus, LoginResponse, MutationOp, MutationResponse,
    RemoteError, ResourceClass, SessionInfo, SessionStatus, UserIdentity,
};
use tether_session::{GuardDecision, MemorySessionPersistence};
use tether_test_utils::assertions::{assert_no_session, assert_unauthorized, assert_validation};
use tether_test_utils::{fixtures, Endpoint, RecordingNavigator, ScriptedRemote};

fn context() -> (ClientContext, Arc<ScriptedRemote>) {
    let remote = Arc::new(ScriptedRemote::new());
    let ctx = ClientContext::new(
        remote.clone(),
        Arc::new(MemorySessionPersistence::new()),
        ContextOptions::default(),
    );
    (ctx, remote)
}

async fn logged_in() -> (ClientContext, Arc<ScriptedRemote>) {
    let (ctx, remote) = context();
    ctx.initialize().await;
    ctx.login(&fixtures::credentials()).await.unwrap();
    (ctx, remote)
}

/// Let spawned watchers observe the latest status.
async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// ----------------------------------------------------------------------------
// Session lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_login_installs_session_and_arms_refresh() {
    let (ctx, remote) = context();
    assert_eq!(ctx.initialize().await, SessionStatus::Unauthenticated);

    let identity = ctx.login(&fixtures::credentials()).await.unwrap();
    assert_eq!(identity, fixtures::identity());
    assert!(ctx.session().status().is_authenticated());
    assert_eq!(remote.calls(Endpoint::SessionInfo), 0);

    settle().await;
    assert!(ctx.scheduler().is_armed());
}

#[tokio::test]
async fn test_login_without_lifetime_reads_session_info() {
    let (ctx, remote) = context();
    remote.set_login(Ok(fixtures::login_response(None)));
    remote.set_session_info(Ok(SessionInfo {
        expires_in: Duration::from_secs(7200),
    }));
    ctx.initialize().await;

    let before = Utc::now();
    ctx.login(&fixtures::credentials()).await.unwrap();

    assert_eq!(remote.calls(Endpoint::SessionInfo), 1);
    let expiry = ctx.session().get_expiry().await.unwrap();
    let lifetime = expiry.signed_duration_since(before);
    assert!(lifetime >= chrono::Duration::seconds(7199));
    assert!(lifetime <= chrono::Duration::seconds(7201));
}

#[tokio::test]
async fn test_failed_login_changes_nothing() {
    let (ctx, remote) = context();
    ctx.initialize().await;

    remote.set_login(Err(RemoteError::Unauthorized));
    assert_unauthorized(&ctx.login(&fixtures::credentials()).await);
    assert_eq!(ctx.session().status(), SessionStatus::Unauthenticated);

    remote.set_login(Ok(fixtures::login_response(None)));
    remote.set_session_info(Err(RemoteError::transient("gateway timeout")));
    assert!(ctx.login(&fixtures::credentials()).await.unwrap_err().is_transient());
    assert_eq!(ctx.session().status(), SessionStatus::Unauthenticated);
    assert!(ctx.session().identity().await.is_none());
}

#[tokio::test]
async fn test_logout_tears_down_cache_and_cancels_timer() {
    let (ctx, remote) = logged_in().await;
    let key = fixtures::categories_key();
    ctx.read::<Value>(&key, ReadPolicy::default()).await.unwrap();
    settle().await;
    assert!(ctx.scheduler().is_armed());

    ctx.logout().await;

    assert_eq!(remote.calls(Endpoint::Logout), 1);
    assert_eq!(ctx.session().status(), SessionStatus::Unauthenticated);
    assert!(!ctx.scheduler().is_armed());
    assert_eq!(ctx.cache().stats().await.entry_count, 0);

    assert_no_session(&ctx.read::<Value>(&key, ReadPolicy::default()).await);
    assert_eq!(remote.fetches_of(&key), 1);
}

#[tokio::test]
async fn test_logout_clears_locally_when_remote_fails() {
    let (ctx, remote) = logged_in().await;
    remote.set_logout(Err(RemoteError::transient("connection refused")));

    ctx.logout().await;

    assert_eq!(remote.calls(Endpoint::Logout), 1);
    assert_eq!(ctx.session().status(), SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn test_unauthorized_read_forces_logout_and_redirect() {
    let (ctx, remote) = logged_in().await;
    let navigator = Arc::new(RecordingNavigator::new());
    let mut guard = ctx.route_guard(navigator.clone());
    assert_eq!(guard.evaluate(), GuardDecision::Render);

    let key = fixtures::categories_key();
    ctx.read::<Value>(&key, ReadPolicy::default()).await.unwrap();

    remote.reject_credentials(true);
    assert_unauthorized(&ctx.read::<Value>(&key, ReadPolicy::ForceRefresh).await);

    assert_eq!(guard.next_decision().await, Some(GuardDecision::Redirected));
    assert_eq!(navigator.redirects(), vec!["/login".to_string()]);

    settle().await;
    assert!(!ctx.scheduler().is_armed());
    assert_eq!(ctx.cache().stats().await.entry_count, 0);
}

#[tokio::test]
async fn test_switching_user_discards_previous_users_data() {
    let (ctx, remote) = logged_in().await;
    let categories = fixtures::categories_key();
    ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();

    remote.set_login(Ok(LoginResponse {
        identity: UserIdentity::new("u-2", "Grace Hopper", "grace@example.com"),
        token: BearerToken::new("token-2"),
        expires_in: Some(Duration::from_secs(3600)),
    }));
    let identity = ctx.login(&fixtures::credentials()).await.unwrap();
    assert_eq!(identity.id, "u-2");

    let read = ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_miss());
    assert_eq!(read.value()["fetch"], 2);
}

#[tokio::test]
async fn test_same_user_login_keeps_cache() {
    let (ctx, remote) = logged_in().await;
    let categories = fixtures::categories_key();
    ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();

    ctx.login(&fixtures::credentials()).await.unwrap();

    let read = ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_hit());
    assert_eq!(remote.fetches_of(&categories), 1);
}

#[tokio::test]
async fn test_restored_session_is_authenticated_on_boot() {
    let remote = Arc::new(ScriptedRemote::new());
    let session = tether_core::Session::new(
        fixtures::identity(),
        BearerToken::new("persisted-token"),
        Utc::now() + chrono::Duration::hours(2),
    );
    let ctx = ClientContext::new(
        remote.clone(),
        Arc::new(MemorySessionPersistence::with_session(session)),
        ContextOptions::default(),
    );

    assert!(ctx.initialize().await.is_authenticated());
    settle().await;
    assert!(ctx.scheduler().is_armed());
    assert_eq!(remote.calls(Endpoint::Login), 0);
}

// ----------------------------------------------------------------------------
// Mutations
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_point_mutation_is_served_without_refetch() {
    let (ctx, remote) = logged_in().await;
    let mut email = fixtures::email("e-1");
    email.status = EmailStatus {
        read: true,
        ..EmailStatus::default()
    };
    let entity = serde_json::to_value(&email).unwrap();
    remote.push_mutation(Ok(MutationResponse::Entity(entity.clone())));

    ctx.mutations()
        .set_email_status("e-1", email.status)
        .await
        .unwrap();

    let key = CacheKey::entity(ResourceClass::Email, "e-1");
    let read = ctx.read::<Value>(&key, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_hit());
    assert_eq!(read.value(), &entity);
    assert_eq!(remote.fetches_of(&key), 0);

    let sent = remote.mutations();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].op, MutationOp::Patch);
    assert_eq!(sent[0].body, Some(json!({ "status": { "read": true, "starred": false, "archived": false } })));
}

#[tokio::test]
async fn test_created_task_lands_under_returned_id() {
    let (ctx, remote) = logged_in().await;
    let listing = CacheKey::new(ResourceClass::Tasks);
    ctx.read::<Value>(&listing, ReadPolicy::default()).await.unwrap();

    let entity = serde_json::to_value(fixtures::task("t-9")).unwrap();
    remote.push_mutation(Ok(MutationResponse::Entity(entity.clone())));
    ctx.mutations().create_task("Reply to Ada", None).await.unwrap();

    let task_key = CacheKey::entity(ResourceClass::Task, "t-9");
    let read = ctx.read::<Value>(&task_key, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_hit());
    assert_eq!(remote.fetches_of(&task_key), 0);

    ctx.read::<Value>(&listing, ReadPolicy::default()).await.unwrap();
    assert_eq!(remote.fetches_of(&listing), 2);
}

#[tokio::test]
async fn test_delete_returning_entity_is_not_cached() {
    let (ctx, remote) = logged_in().await;
    let key = CacheKey::entity(ResourceClass::Task, "t-1");
    let listing = CacheKey::new(ResourceClass::Tasks);
    ctx.read::<Value>(&key, ReadPolicy::default()).await.unwrap();
    ctx.read::<Value>(&listing, ReadPolicy::default()).await.unwrap();

    let entity = serde_json::to_value(fixtures::task("t-1")).unwrap();
    remote.push_mutation(Ok(MutationResponse::Entity(entity.clone())));
    ctx.mutations().delete_task("t-1").await.unwrap();

    assert!(ctx.cache().peek(&key).await.is_none());
    let read = ctx.read::<Value>(&key, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_miss());
    assert_ne!(read.value(), &entity);
    assert_eq!(remote.fetches_of(&key), 2);

    ctx.read::<Value>(&listing, ReadPolicy::default()).await.unwrap();
    assert_eq!(remote.fetches_of(&listing), 2);
}

#[tokio::test]
async fn test_partial_response_falls_back_to_refetch() {
    let (ctx, remote) = logged_in().await;
    let key = CacheKey::entity(ResourceClass::Task, "t-1");
    remote.set_collection(key.clone(), Ok(json!({ "id": "t-1", "title": "Fresh", "done": true })));
    remote.push_mutation(Ok(MutationResponse::Partial(json!({ "done": true }))));

    ctx.mutations().complete_task("t-1").await.unwrap();

    assert_eq!(remote.fetches_of(&key), 1);
    let read = ctx.read::<Value>(&key, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_hit());
    assert_eq!(read.value()["title"], "Fresh");
}

#[tokio::test]
async fn test_category_delete_refetches_categories_and_listings() {
    let (ctx, remote) = logged_in().await;
    let categories = fixtures::categories_key();
    let work = fixtures::email_listing("work");

    ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();
    ctx.read::<Value>(&work, ReadPolicy::default()).await.unwrap();
    assert!(ctx
        .read::<Value>(&work, ReadPolicy::default())
        .await
        .unwrap()
        .was_cache_hit());

    ctx.mutations().delete_category("work").await.unwrap();

    let categories_read = ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();
    let work_read = ctx.read::<Value>(&work, ReadPolicy::default()).await.unwrap();
    assert!(categories_read.was_cache_miss());
    assert!(work_read.was_cache_miss());
    assert_eq!(categories_read.value()["fetch"], 2);
    assert_eq!(work_read.value()["fetch"], 2);
}

#[tokio::test]
async fn test_failed_mutation_leaves_cache_untouched() {
    let (ctx, remote) = logged_in().await;
    let categories = fixtures::categories_key();
    ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();

    remote.push_mutation(Err(RemoteError::transient("upstream unavailable")));
    let result = ctx.mutations().delete_category("work").await;
    assert!(result.unwrap_err().is_transient());

    let read = ctx.read::<Value>(&categories, ReadPolicy::default()).await.unwrap();
    assert!(read.was_cache_hit());
    assert_eq!(remote.fetches_of(&categories), 1);
    assert!(ctx.session().status().is_authenticated());
}

#[tokio::test]
async fn test_invalid_mutations_never_reach_remote() {
    let (ctx, remote) = logged_in().await;
    let mutations = ctx.mutations();

    assert_validation(&mutations.create_category("   ", None).await);
    assert_validation(&mutations.rename_category("work", "").await);
    assert_validation(&mutations.recategorize(&[], "work").await);
    assert_validation(&mutations.update_task("", json!({ "done": true })).await);
    assert_validation(&mutations.update_task("t-1", json!("done")).await);
    assert_validation(&mutations.delete_category("a/b").await);

    assert_eq!(remote.calls(Endpoint::Mutate), 0);
}

#[tokio::test]
async fn test_recategorize_sends_one_bulk_request() {
    let (ctx, remote) = logged_in().await;
    let ids = vec!["e-1".to_string(), "e-2".to_string()];

    ctx.mutations().recategorize(&ids, "receipts").await.unwrap();

    let sent = remote.mutations();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].op, MutationOp::BulkPatch);
    assert_eq!(sent[0].class, ResourceClass::Emails);
    assert_eq!(
        sent[0].body,
        Some(json!({ "emailIds": ["e-1", "e-2"], "category": "receipts" }))
    );
}

#[tokio::test]
async fn test_mutation_without_session_is_no_session() {
    let (ctx, remote) = context();
    ctx.initialize().await;

    assert_no_session(&ctx.mutations().delete_task("t-1").await);
    assert_eq!(remote.calls(Endpoint::Mutate), 0);
}
