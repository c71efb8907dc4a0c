//! Dashboard trend panels against a local admin API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use adminsync_cache::QueryPolicy;
use adminsync_client::{keys, MemoryCredentialStore, SyncContext, RECENT_JOBS_LIMIT};
use adminsync_core::{Change, ChangeKind};
use adminsync_test_utils::fixtures;
use adminsync_test_utils::server::{fail, ok, TestServer};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

// ============================================================================
// TEST SERVER
// ============================================================================

type Params = HashMap<String, String>;

#[derive(Debug, Clone, Default)]
struct Recorder {
    hits: Arc<Mutex<HashMap<String, usize>>>,
    queries: Arc<Mutex<Vec<(String, Params)>>>,
}

impl Recorder {
    fn record(&self, route: &str, params: Params) {
        *self.hits.lock().unwrap().entry(route.to_string()).or_insert(0) += 1;
        self.queries.lock().unwrap().push((route.to_string(), params));
    }

    fn count(&self, route: &str) -> usize {
        self.hits.lock().unwrap().get(route).copied().unwrap_or(0)
    }

    fn last_query(&self, route: &str) -> Params {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(r, _)| r == route)
            .map(|(_, p)| p.clone())
            .unwrap_or_default()
    }
}

fn days_ago(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339()
}

fn job_row(id: &str, user_id: &str, status: &str, created_at: &str) -> Value {
    let mut job = fixtures::job(id, status);
    job["user_id"] = json!(user_id);
    job["created_at"] = json!(created_at);
    job
}

fn job_list(jobs: Vec<Value>) -> Value {
    let total = jobs.len();
    json!({
        "jobs": jobs,
        "pagination": { "total": total, "page": 1, "limit": 10, "totalPages": 1 }
    })
}

async fn list_jobs(State(rec): State<Recorder>, Query(params): Query<Params>) -> Json<Value> {
    let newest_first = params.get("sort_order").map(String::as_str) == Some("DESC");
    rec.record("jobs", params);
    if newest_first {
        return ok(job_list(vec![
            job_row("j3", "u2", "processing", &days_ago(0)),
            job_row("j2", "ghost", "failed", &days_ago(0)),
            job_row("j1", "u1", "completed", &days_ago(1)),
        ]));
    }
    ok(job_list(vec![
        job_row("j1", "u1", "completed", &days_ago(1)),
        job_row("j2", "u1", "completed", &days_ago(0)),
        job_row("j3", "u1", "failed", &days_ago(0)),
        job_row("j4", "u1", "queue", &days_ago(0)),
        job_row("j0", "u1", "completed", &days_ago(30)),
    ]))
}

async fn list_users(State(rec): State<Recorder>, Query(params): Query<Params>) -> Json<Value> {
    rec.record("users", params);
    let mut users = Vec::new();
    for (id, age) in [("u1", 0), ("u2", 0), ("u3", 3)] {
        let mut user = fixtures::user(id);
        user["created_at"] = json!(days_ago(age));
        users.push(user);
    }
    ok(json!({
        "users": users,
        "pagination": { "total": 3, "page": 1, "limit": 1000, "totalPages": 1 }
    }))
}

async fn get_user(State(rec): State<Recorder>, Path(id): Path<String>) -> Response {
    rec.record("user", Params::new());
    if id == "ghost" {
        return fail(StatusCode::NOT_FOUND, "User not found");
    }
    ok(fixtures::user_detail(&id)).into_response()
}

async fn models(State(rec): State<Recorder>) -> Json<Value> {
    rec.record("models", Params::new());
    ok(fixtures::model_stats())
}

async fn start() -> (TestServer, SyncContext, Recorder) {
    let rec = Recorder::default();
    let router = Router::new()
        .route("/admin/jobs", get(list_jobs))
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id", get(get_user))
        .route("/admin/chatbot/models", get(models))
        .with_state(rec.clone());

    let server = TestServer::start(router).await.unwrap();
    let ctx = SyncContext::builder(server.config())
        .credentials(Arc::new(MemoryCredentialStore::with_token("admin-token")))
        .build()
        .unwrap();
    (server, ctx, rec)
}

// ============================================================================
// TREND PANELS
// ============================================================================

#[tokio::test]
async fn test_job_trend_buckets_last_week() {
    let (_server, ctx, rec) = start().await;

    let trend = ctx.queries().job_trend().await.unwrap();
    let points = trend.value();
    assert_eq!(points.len(), 7);

    let today = points[6];
    assert_eq!(today.date, Utc::now().date_naive());
    assert_eq!((today.count, today.completed, today.failed), (3, 1, 1));
    assert_eq!(points[5].count, 1);
    // The 30-day-old job falls outside the window.
    assert_eq!(points.iter().map(|p| p.count).sum::<u64>(), 4);

    let query = rec.last_query("jobs");
    let from = (Utc::now() - Duration::days(6)).date_naive().to_string();
    assert_eq!(query.get("date_from"), Some(&from));
    assert_eq!(query.get("date_to"), Some(&Utc::now().date_naive().to_string()));
    assert_eq!(query.get("limit").map(String::as_str), Some("1000"));
    assert_eq!(query.get("sort_order").map(String::as_str), Some("ASC"));

    ctx.queries().job_trend().await.unwrap();
    assert_eq!(rec.count("jobs"), 1);
}

#[tokio::test]
async fn test_user_growth_counts_signups_per_day() {
    let (_server, ctx, rec) = start().await;

    let growth = ctx.queries().user_growth().await.unwrap();
    let points = growth.value();
    assert_eq!(points.len(), 7);
    assert_eq!(points[6].count, 2);
    assert_eq!(points[3].count, 1);

    let query = rec.last_query("users");
    assert_eq!(query.get("sort_by").map(String::as_str), Some("created_at"));
    assert_eq!(query.get("limit").map(String::as_str), Some("1000"));
}

#[tokio::test]
async fn test_top_models_is_cached_apart_from_models() {
    let (_server, ctx, rec) = start().await;

    let top = ctx.queries().top_models().await.unwrap();
    assert_eq!(top.value().models[0].model, "gemini-flash");
    ctx.queries().top_models().await.unwrap();
    assert_eq!(rec.count("models"), 1);

    ctx.queries().models().await.unwrap();
    assert_eq!(rec.count("models"), 2);
}

// ============================================================================
// RECENT JOBS
// ============================================================================

#[tokio::test]
async fn test_recent_jobs_attach_owners_and_survive_failed_lookup() {
    let (_server, ctx, rec) = start().await;

    let recent = ctx.queries().recent_jobs().await.unwrap();
    let rows = recent.value();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].job.id, "j3");
    assert_eq!(rows[0].owner.as_ref().map(|u| u.id.as_str()), Some("u2"));
    assert_eq!(rows[1].job.id, "j2");
    assert!(rows[1].owner.is_none());
    assert_eq!(rows[2].owner.as_ref().map(|u| u.id.as_str()), Some("u1"));
    assert_eq!(rec.count("user"), 3);

    let query = rec.last_query("jobs");
    assert_eq!(query.get("page").map(String::as_str), Some("1"));
    assert_eq!(query.get("limit"), Some(&RECENT_JOBS_LIMIT.to_string()));
    assert_eq!(query.get("sort_by").map(String::as_str), Some("created_at"));
    assert_eq!(query.get("sort_order").map(String::as_str), Some("DESC"));

    // A failed owner lookup is not a session event.
    assert!(ctx.session().is_armed());
}

// ============================================================================
// INVALIDATION AND POLLING
// ============================================================================

#[tokio::test]
async fn test_job_changes_evict_trend_and_recent_feed() {
    let (_server, ctx, _rec) = start().await;
    let policy = QueryPolicy::minutes(5, 10);
    for key in [
        keys::job_trend(),
        keys::recent_jobs(),
        keys::user_growth(),
        keys::top_models(),
        keys::system_metrics(),
    ] {
        ctx.cache().set(&key, &policy, 1u8);
    }

    ctx.cache().apply_change(&Change::for_subject(ChangeKind::JobUpdated, "j1"));
    assert!(!ctx.cache().contains(&keys::job_trend()));
    assert!(!ctx.cache().contains(&keys::recent_jobs()));
    assert!(ctx.cache().contains(&keys::user_growth()));
    assert!(ctx.cache().contains(&keys::top_models()));
    assert!(ctx.cache().contains(&keys::system_metrics()));

    ctx.cache().set(&keys::job_trend(), &policy, 1u8);
    ctx.cache().apply_change(&Change::new(ChangeKind::JobStatsUpdated));
    assert!(!ctx.cache().contains(&keys::job_trend()));
}

#[tokio::test]
async fn test_poll_dashboard_covers_every_panel() {
    let (_server, ctx, _rec) = start().await;

    let handles = ctx.queries().poll_dashboard();
    let polled: Vec<_> = handles.iter().map(|h| h.key().clone()).collect();
    for key in [
        keys::job_stats(),
        keys::chatbot_stats(),
        keys::system_metrics(),
        keys::job_trend(),
        keys::user_growth(),
        keys::top_models(),
        keys::recent_jobs(),
    ] {
        assert!(polled.contains(&key), "{} is not polled", key);
    }
    assert!(handles.iter().all(|h| h.is_active()));
}
