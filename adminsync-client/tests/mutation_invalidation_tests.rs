//! Reads and writes against a local admin API.
//!
//! **Property 4: Writes invalidate what they change**
//! Every successful mutation leaves no cached entry under the prefixes its
//! change maps to, and leaves unrelated entries alone. A failed mutation
//! evicts nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use adminsync_cache::QueryPolicy;
use adminsync_client::{
    keys, CreateSchool, DeleteSchool, MemoryCredentialStore, SyncContext, UpdateSchool,
    UpdateTokenBalance, UpdateUser,
};
use adminsync_core::types::{PageParams, SchoolFields, SchoolFilters, UserFilters, UserUpdate};
use adminsync_core::{QueryKey, SyncError};
use adminsync_test_utils::fixtures;
use adminsync_test_utils::server::{fail, ok, TestServer};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

// ============================================================================
// TEST SERVER
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Hits(Arc<Mutex<HashMap<&'static str, usize>>>);

impl Hits {
    fn record(&self, route: &'static str) {
        *self.0.lock().unwrap().entry(route).or_insert(0) += 1;
    }

    fn count(&self, route: &'static str) -> usize {
        self.0.lock().unwrap().get(route).copied().unwrap_or(0)
    }
}

async fn list_users(State(hits): State<Hits>) -> Json<Value> {
    hits.record("users");
    ok(fixtures::user_list(&["u1", "u2"]))
}

async fn get_user(State(hits): State<Hits>, Path(id): Path<String>) -> Json<Value> {
    hits.record("user");
    ok(fixtures::user_detail(&id))
}

async fn update_user(State(hits): State<Hits>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    hits.record("update_user");
    if id == "missing" {
        return fail(StatusCode::NOT_FOUND, "User not found");
    }
    let mut user = fixtures::user(&id);
    if let Some(username) = body.get("username") {
        user["username"] = username.clone();
    }
    ok(user).into_response()
}

async fn get_tokens(State(hits): State<Hits>) -> Json<Value> {
    hits.record("tokens");
    ok(fixtures::token_history(10))
}

async fn update_tokens(State(hits): State<Hits>, Json(body): Json<Value>) -> Json<Value> {
    hits.record("update_tokens");
    let amount = body["amount"].as_i64().unwrap_or(0);
    ok(json!({ "newBalance": 10 + amount }))
}

async fn user_jobs(State(hits): State<Hits>) -> Json<Value> {
    hits.record("user_jobs");
    ok(json!({ "jobs": [], "pagination": { "total": 0, "page": 1, "limit": 10, "totalPages": 0 } }))
}

async fn list_schools(State(hits): State<Hits>) -> Json<Value> {
    hits.record("schools");
    ok(fixtures::school_list(&[(1, "SMA 1 Bandung"), (2, "SMA 3 Bandung")]))
}

async fn create_school(State(hits): State<Hits>, Json(body): Json<Value>) -> Json<Value> {
    hits.record("create_school");
    ok(fixtures::school(3, body["name"].as_str().unwrap_or_default()))
}

async fn get_school(State(hits): State<Hits>, Path(id): Path<i64>) -> Json<Value> {
    hits.record("school");
    let mut detail = fixtures::school(id, "SMA 1 Bandung");
    detail["userCount"] = json!(12);
    ok(detail)
}

async fn update_school(State(hits): State<Hits>, Path(id): Path<i64>, Json(body): Json<Value>) -> Json<Value> {
    hits.record("update_school");
    ok(fixtures::school(id, body["name"].as_str().unwrap_or_default()))
}

async fn delete_school(State(hits): State<Hits>) -> StatusCode {
    hits.record("delete_school");
    StatusCode::NO_CONTENT
}

async fn job_stats(State(hits): State<Hits>) -> Json<Value> {
    hits.record("job_stats");
    ok(fixtures::job_stats(40))
}

async fn chatbot_stats(State(hits): State<Hits>) -> Json<Value> {
    hits.record("chatbot_stats");
    ok(fixtures::chatbot_stats())
}

async fn system_metrics(State(hits): State<Hits>) -> Json<Value> {
    hits.record("system_metrics");
    ok(fixtures::system_metrics())
}

async fn start() -> (TestServer, SyncContext, Hits) {
    let hits = Hits::default();
    let router = Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id", get(get_user).put(update_user))
        .route("/admin/users/:id/tokens", get(get_tokens).put(update_tokens))
        .route("/admin/users/:id/jobs", get(user_jobs))
        .route("/admin/schools", get(list_schools).post(create_school))
        .route(
            "/admin/schools/:id",
            get(get_school).put(update_school).delete(delete_school),
        )
        .route("/admin/jobs/stats", get(job_stats))
        .route("/admin/chatbot/stats", get(chatbot_stats))
        .route("/admin/system/metrics", get(system_metrics))
        .with_state(hits.clone());

    let server = TestServer::start(router).await.unwrap();
    let ctx = SyncContext::builder(server.config())
        .credentials(Arc::new(MemoryCredentialStore::with_token("admin-token")))
        .build()
        .unwrap();
    (server, ctx, hits)
}

fn seed(ctx: &SyncContext, keys: &[&QueryKey]) {
    let policy = QueryPolicy::minutes(5, 10);
    for key in keys {
        ctx.cache().set(key, &policy, 1u8);
    }
}

// ============================================================================
// READS
// ============================================================================

#[tokio::test]
async fn test_repeated_list_read_hits_network_once() {
    let (_server, ctx, hits) = start().await;
    let filters = UserFilters::page(1);

    let first = ctx.queries().users(&filters).await.unwrap();
    let second = ctx.queries().users(&filters).await.unwrap();

    assert_eq!(hits.count("users"), 1);
    assert!(!first.was_cache_hit());
    assert!(second.was_cache_hit());
    assert_eq!(second.value().users.len(), 2);

    // Different filters are a different key.
    ctx.queries().users(&UserFilters::page(2)).await.unwrap();
    assert_eq!(hits.count("users"), 2);
}

#[tokio::test]
async fn test_dashboard_summary_combines_three_reads() {
    let (_server, ctx, hits) = start().await;

    let summary = ctx.queries().dashboard_summary().await.unwrap();
    assert_eq!(summary.jobs_total, 40);
    assert_eq!(summary.total_users, 1200);
    assert_eq!(hits.count("job_stats"), 1);
    assert_eq!(hits.count("chatbot_stats"), 1);
    assert_eq!(hits.count("system_metrics"), 1);
}

#[tokio::test]
async fn test_invalid_ids_never_reach_network() {
    let (_server, ctx, hits) = start().await;

    let err = ctx.queries().school(0).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    let err = ctx.queries().user("").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(hits.count("school") + hits.count("user"), 0);
}

#[tokio::test]
async fn test_ids_with_reserved_characters_stay_one_segment() {
    let (_server, ctx, hits) = start().await;

    let detail = ctx.queries().user("team/a b").await.unwrap();
    assert_eq!(detail.value().user.id, "team/a b");
    assert_eq!(hits.count("user"), 1);

    let history = ctx.queries().token_history("x?y#z").await.unwrap();
    assert_eq!(history.value().current_balance, 10);
    assert_eq!(hits.count("tokens"), 1);
    assert_eq!(hits.count("users"), 0);
}

// ============================================================================
// WRITES
// ============================================================================

#[tokio::test]
async fn test_token_update_evicts_user_views() {
    let (_server, ctx, hits) = start().await;
    ctx.queries().user("u1").await.unwrap();
    ctx.queries().token_history("u1").await.unwrap();
    ctx.queries().users(&UserFilters::page(1)).await.unwrap();
    ctx.queries().user("u2").await.unwrap();
    assert_eq!(hits.count("user"), 2);

    let output = ctx
        .mutate(&UpdateTokenBalance::new("u1", 100, "Manual top-up"))
        .await
        .unwrap();
    assert_eq!(output["newBalance"], 110);

    assert!(!ctx.cache().contains(&keys::tokens("u1")));
    assert!(!ctx.cache().contains(&keys::user("u1")));
    assert!(!ctx.cache().contains(&keys::users(&UserFilters::page(1))));
    assert!(ctx.cache().contains(&keys::user("u2")));

    ctx.queries().user("u1").await.unwrap();
    assert_eq!(hits.count("user"), 3);
}

#[tokio::test]
async fn test_every_mutation_clears_its_prefixes() {
    let (_server, ctx, hits) = start().await;
    let page = PageParams::new(1, 10);
    let users = keys::users(&UserFilters::page(1));
    let user = keys::user("u1");
    let tokens = keys::tokens("u1");
    let user_jobs = keys::user_jobs("u1", &page);
    let schools = keys::schools(&SchoolFilters::default());
    let school = keys::school(1);
    let other_school = keys::school(2);
    let stats = keys::job_stats();
    let all = [&users, &user, &tokens, &user_jobs, &schools, &school, &other_school, &stats];

    seed(&ctx, &all);
    let renamed = UserUpdate {
        username: Some("renamed".to_string()),
        ..UserUpdate::default()
    };
    let updated = ctx.mutate(&UpdateUser::new("u1", renamed)).await.unwrap();
    assert_eq!(updated.username, "renamed");
    assert!(!ctx.cache().contains(&user));
    assert!(!ctx.cache().contains(&users));
    assert!(ctx.cache().contains(&tokens));
    assert!(ctx.cache().contains(&user_jobs));

    seed(&ctx, &all);
    ctx.mutate(&CreateSchool::new(SchoolFields::named("SMA 5 Bandung")))
        .await
        .unwrap();
    assert!(!ctx.cache().contains(&schools));
    assert!(ctx.cache().contains(&school));
    assert!(ctx.cache().contains(&users));

    seed(&ctx, &all);
    ctx.mutate(&UpdateSchool::new(1, SchoolFields::named("SMA 1 Cimahi")))
        .await
        .unwrap();
    assert!(!ctx.cache().contains(&school));
    assert!(!ctx.cache().contains(&schools));
    assert!(ctx.cache().contains(&other_school));

    seed(&ctx, &all);
    ctx.mutate(&DeleteSchool::new(1)).await.unwrap();
    assert!(!ctx.cache().contains(&school));
    assert!(!ctx.cache().contains(&schools));
    assert!(!ctx.cache().contains(&users));
    assert!(ctx.cache().contains(&other_school));
    assert!(ctx.cache().contains(&stats));

    assert_eq!(hits.count("update_user"), 1);
    assert_eq!(hits.count("create_school"), 1);
    assert_eq!(hits.count("update_school"), 1);
    assert_eq!(hits.count("delete_school"), 1);
}

#[tokio::test]
async fn test_failed_mutation_keeps_cache() {
    let (_server, ctx, hits) = start().await;
    let user = keys::user("missing");
    let users = keys::users(&UserFilters::page(1));
    seed(&ctx, &[&user, &users]);

    let fields = UserUpdate {
        is_active: Some(false),
        ..UserUpdate::default()
    };
    let err = ctx.mutate(&UpdateUser::new("missing", fields)).await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    assert_eq!(err.to_string(), SyncError::server(404, "User not found").to_string());
    assert_eq!(hits.count("update_user"), 1);
    assert!(ctx.cache().contains(&user));
    assert!(ctx.cache().contains(&users));
}

#[tokio::test]
async fn test_invalid_mutation_is_not_sent() {
    let (_server, ctx, hits) = start().await;

    let err = ctx
        .mutate(&UpdateUser::new("u1", UserUpdate::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = ctx
        .mutate(&UpdateTokenBalance::new("u1", 0, "nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = ctx.mutate(&DeleteSchool::new(-4)).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    assert_eq!(hits.count("update_user"), 0);
    assert_eq!(hits.count("update_tokens"), 0);
    assert_eq!(hits.count("delete_school"), 0);
}
