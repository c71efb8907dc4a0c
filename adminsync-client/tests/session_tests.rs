//! Authentication, session expiry and transport failure handling against a
//! local admin API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adminsync_cache::QueryPolicy;
use adminsync_client::{CredentialStore, MemoryCredentialStore, SyncContext};
use adminsync_core::types::{LoginCredentials, UserFilters, UserType};
use adminsync_core::{QueryKey, SyncError};
use adminsync_test_utils::server::{fail, ok, TestServer};
use adminsync_test_utils::{fixtures, RecordingNavigator};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

const VALID_TOKEN: &str = "valid-token";

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn authorized(headers: &HeaderMap) -> bool {
    bearer(headers).as_deref() == Some(VALID_TOKEN)
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] != "secret" {
        return fail(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }
    ok(json!({
        "user": { "id": "admin-1", "email": body["email"], "user_type": "admin" },
        "token": VALID_TOKEN
    }))
    .into_response()
}

async fn verify(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return fail(StatusCode::UNAUTHORIZED, "Token expired");
    }
    ok(json!({ "id": "admin-1", "email": "admin@futureguide.id", "user_type": "admin" })).into_response()
}

async fn logout() -> Response {
    fail(StatusCode::INTERNAL_SERVER_ERROR, "Session store unavailable")
}

async fn list_users(State(calls): State<Arc<AtomicUsize>>, headers: HeaderMap) -> Response {
    calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return fail(StatusCode::UNAUTHORIZED, "Token expired");
    }
    ok(fixtures::user_list(&["u1"])).into_response()
}

async fn slow_stats() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    ok(fixtures::job_stats(1))
}

async fn bare_ok() -> &'static str {
    "not json"
}

async fn start(token: Option<&str>, route: &str) -> (TestServer, SyncContext, Arc<RecordingNavigator>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/admin/auth/login", post(login))
        .route("/admin/auth/verify", get(verify))
        .route("/admin/auth/logout", post(logout))
        .route("/admin/users", get(list_users))
        .route("/admin/jobs/stats", get(slow_stats))
        .route("/admin/system/metrics", get(bare_ok))
        .with_state(Arc::clone(&calls));
    let server = TestServer::start(router).await.unwrap();

    let credentials = match token {
        Some(token) => MemoryCredentialStore::with_token(token),
        None => MemoryCredentialStore::new(),
    };
    let navigator = Arc::new(RecordingNavigator::at(route));
    let mut config = server.config();
    config.request_timeout_ms = 200;
    let ctx = SyncContext::builder(config)
        .credentials(Arc::new(credentials))
        .navigator(navigator.clone())
        .build()
        .unwrap();
    (server, ctx, navigator, calls)
}

// ============================================================================
// SESSION EXPIRY
// ============================================================================

#[tokio::test]
async fn test_unauthorized_redirects_once_and_clears_session() {
    let (_server, ctx, navigator, calls) = start(Some("expired-token"), "/users").await;
    let cached = QueryKey::new("schools");
    ctx.cache().set(&cached, &QueryPolicy::minutes(5, 10), 1u8);

    let page_one = UserFilters::page(1);
    let page_two = UserFilters::page(2);
    let (first, second) = tokio::join!(
        ctx.queries().users(&page_one),
        ctx.queries().users(&page_two),
    );

    assert_eq!(first.unwrap_err().status_code(), Some(401));
    assert_eq!(second.unwrap_err().status_code(), Some(401));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(navigator.redirects(), vec!["/login".to_string()]);
    assert!(ctx.credentials().token().is_none());
    assert!(!ctx.cache().contains(&cached));
}

#[tokio::test]
async fn test_failed_login_does_not_redirect() {
    let (_server, ctx, navigator, _) = start(None, "/login").await;

    let err = ctx
        .auth()
        .login(&LoginCredentials::new("admin@futureguide.id", "wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(401));
    assert_eq!(err.to_string(), SyncError::server(401, "Invalid email or password").to_string());
    assert_eq!(navigator.redirect_count(), 0);
    assert!(ctx.session().is_armed());
}

#[tokio::test]
async fn test_login_rearms_after_expiry() {
    let (_server, ctx, navigator, _) = start(Some("expired-token"), "/users").await;
    ctx.queries().users(&UserFilters::page(1)).await.unwrap_err();
    assert_eq!(navigator.redirect_count(), 1);
    assert!(!ctx.session().is_armed());

    let user = ctx
        .auth()
        .login(&LoginCredentials::new("admin@futureguide.id", "secret"))
        .await
        .unwrap();
    assert_eq!(user.user_type, UserType::Admin);
    assert_eq!(ctx.credentials().token().as_deref(), Some(VALID_TOKEN));
    assert!(ctx.session().is_armed());

    let users = ctx.queries().users(&UserFilters::page(1)).await.unwrap();
    assert_eq!(users.value().users.len(), 1);
}

// ============================================================================
// AUTH SERVICE
// ============================================================================

#[tokio::test]
async fn test_verify_reports_user_or_clears_token() {
    let (_server, ctx, navigator, _) = start(Some(VALID_TOKEN), "/users").await;
    let user = ctx.auth().verify().await.unwrap().unwrap();
    assert_eq!(user.id, "admin-1");

    ctx.credentials().store("stale-token").unwrap();
    assert!(ctx.auth().verify().await.unwrap().is_none());
    assert!(!ctx.auth().is_authenticated());
    // Auth endpoints never trigger the redirect.
    assert_eq!(navigator.redirect_count(), 0);

    assert!(ctx.auth().verify().await.unwrap().is_none());
}

#[tokio::test]
async fn test_logout_clears_state_even_when_server_fails() {
    let (_server, ctx, _, _) = start(Some(VALID_TOKEN), "/users").await;
    ctx.queries().users(&UserFilters::page(1)).await.unwrap();
    assert_eq!(ctx.cache().len(), 1);

    ctx.auth().logout().await.unwrap();
    assert!(ctx.cache().is_empty());
    assert!(!ctx.auth().is_authenticated());
}

// ============================================================================
// TRANSPORT FAILURES
// ============================================================================

#[tokio::test]
async fn test_timeout_is_network_error() {
    let (_server, ctx, _, _) = start(Some(VALID_TOKEN), "/users").await;
    let err = ctx.client().get::<Value, ()>("/admin/jobs/stats", None).await.unwrap_err();
    assert!(matches!(err, SyncError::Network { .. }), "got {:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let server = TestServer::start(Router::new()).await.unwrap();
    let config = server.config();
    drop(server);
    tokio::task::yield_now().await;

    let ctx = SyncContext::builder(config).build().unwrap();
    let err = ctx.client().get::<Value, ()>("/admin/users", None).await.unwrap_err();
    assert!(matches!(err, SyncError::Network { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_non_json_body_is_client_error() {
    let (_server, ctx, _, _) = start(Some(VALID_TOKEN), "/users").await;
    let err = ctx.client().get::<Value, ()>("/admin/system/metrics", None).await.unwrap_err();
    assert!(matches!(err, SyncError::Client { .. }), "got {:?}", err);
}
