//! adminsync Test Utilities
//!
//! Shared test infrastructure for the adminsync workspace:
//! - A scriptable [`Transport`] for driving the realtime manager
//! - A navigator that records login redirects
//! - A local admin API server built on axum
//! - Proptest generators and JSON fixtures for admin API payloads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use adminsync_client::{AdminSyncConfig, Navigator, RealtimeError, Transport};
pub use adminsync_core::{ChangeKind, Frame, QueryKey};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Drop,
    Error(String),
}

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<Frame>,
    connects: usize,
    closes: usize,
    tokens: Vec<Option<String>>,
    failing_connects: usize,
}

#[derive(Debug, Default)]
struct Shared {
    recorded: Mutex<Recorded>,
    connected: AtomicBool,
}

impl Shared {
    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        match self.recorded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// In-memory [`Transport`]. Inbound traffic is scripted through the paired
/// [`MockTransportHandle`]; outbound frames and connection attempts are
/// recorded there.
///
/// Frames pushed while disconnected are delivered after the next connect.
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    connected: bool,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let shared = Arc::new(Shared::default());
        let (sender, inbound) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::clone(&shared),
            inbound,
            connected: false,
        };
        (transport, MockTransportHandle { shared, inbound: sender })
    }

    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        self.shared.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _url: &str, token: Option<&str>) -> Result<(), RealtimeError> {
        {
            let mut recorded = self.shared.recorded();
            recorded.connects += 1;
            recorded.tokens.push(token.map(str::to_string));
            if recorded.failing_connects > 0 {
                recorded.failing_connects -= 1;
                return Err(RealtimeError::Transport("connection refused".to_string()));
            }
        }
        self.set_connected(true);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.shared.recorded().closes += 1;
        self.set_connected(false);
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), RealtimeError> {
        if !self.connected {
            return Err(RealtimeError::Closed);
        }
        self.shared.recorded().sent.push(frame.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, RealtimeError> {
        if !self.connected {
            return Err(RealtimeError::Closed);
        }
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Drop) => {
                self.set_connected(false);
                Ok(None)
            }
            Some(Inbound::Error(message)) => {
                self.set_connected(false);
                Err(RealtimeError::Transport(message))
            }
            // Script finished: the connection stays open and silent.
            None => std::future::pending().await,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Script and inspect a [`MockTransport`] after it has been moved into a
/// manager.
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MockTransportHandle {
    /// Deliver a server event.
    pub fn push(&self, event: &str, data: serde_json::Value) {
        self.push_frame(Frame::new(event, data));
    }

    pub fn push_frame(&self, frame: Frame) {
        let _ = self.inbound.send(Inbound::Frame(frame));
    }

    /// Simulate the server closing the connection.
    pub fn drop_connection(&self) {
        let _ = self.inbound.send(Inbound::Drop);
    }

    /// Simulate a transport error on the open connection.
    pub fn fail_connection(&self, message: &str) {
        let _ = self.inbound.send(Inbound::Error(message.to_string()));
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.recorded().failing_connects = n;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.shared.recorded().connects
    }

    pub fn closes(&self) -> usize {
        self.shared.recorded().closes
    }

    /// Bearer token presented on each connection attempt, in order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.shared.recorded().tokens.clone()
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.shared.recorded().sent.clone()
    }

    pub fn sent_events(&self) -> Vec<String> {
        self.shared.recorded().sent.iter().map(|f| f.event.clone()).collect()
    }

    /// Join frames sent for `channel`.
    pub fn joins(&self, channel: &str) -> usize {
        self.shared
            .recorded()
            .sent
            .iter()
            .filter(|f| f.subscribed_channel() == Some(channel))
            .count()
    }

    /// Leave frames sent for `channel`.
    pub fn leaves(&self, channel: &str) -> usize {
        self.shared
            .recorded()
            .sent
            .iter()
            .filter(|f| f.unsubscribed_channel() == Some(channel))
            .count()
    }

    pub fn clear_sent(&self) {
        self.shared.recorded().sent.clear();
    }
}

// ============================================================================
// NAVIGATOR
// ============================================================================

/// [`Navigator`] that records every login redirect.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    route: Mutex<Option<String>>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Navigator currently showing `route`.
    pub fn at(route: &str) -> Self {
        let navigator = Self::default();
        navigator.set_route(route);
        navigator
    }

    pub fn set_route(&self, route: &str) {
        *lock(&self.route) = Some(route.to_string());
    }

    pub fn redirects(&self) -> Vec<String> {
        lock(&self.redirects).clone()
    }

    pub fn redirect_count(&self) -> usize {
        lock(&self.redirects).len()
    }
}

impl Navigator for RecordingNavigator {
    fn current_route(&self) -> Option<String> {
        lock(&self.route).clone()
    }

    fn redirect_to_login(&self, login_route: &str) {
        lock(&self.redirects).push(login_route.to_string());
        self.set_route(login_route);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// LOCAL API SERVER
// ============================================================================

pub mod server {
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::AdminSyncConfig;

    /// An axum router served on an ephemeral localhost port. Stops on drop.
    #[derive(Debug)]
    pub struct TestServer {
        base_url: String,
        task: JoinHandle<()>,
    }

    impl TestServer {
        pub async fn start(router: Router) -> std::io::Result<Self> {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            let task = tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });
            Ok(Self {
                base_url: format!("http://{}", addr),
                task,
            })
        }

        pub fn url(&self) -> &str {
            &self.base_url
        }

        /// Client config pointed at this server, realtime disabled.
        pub fn config(&self) -> AdminSyncConfig {
            let mut config = AdminSyncConfig::new(self.base_url.clone(), self.base_url.clone());
            config.ws_enabled = false;
            config.request_timeout_ms = 2_000;
            config
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    /// `{"success": true, "data": data}`.
    pub fn ok(data: serde_json::Value) -> Json<serde_json::Value> {
        Json(json!({ "success": true, "data": data }))
    }

    /// Error response with the admin API's error body.
    pub fn fail(status: StatusCode, message: &str) -> Response {
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;

    use super::{ChangeKind, QueryKey};

    /// Realtime channel names.
    pub fn arb_channel() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["jobs", "alerts", "job-stats", "users", "system"])
            .prop_map(str::to_string)
    }

    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop::sample::select(ChangeKind::ALL.to_vec())
    }

    /// Entity ids as the admin API issues them.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[a-f0-9]{8}"
    }

    /// A subscribe (true) or unsubscribe (false) on a channel.
    pub fn arb_channel_op() -> impl Strategy<Value = (bool, String)> {
        (any::<bool>(), arb_channel())
    }

    pub fn arb_channel_ops(max: usize) -> impl Strategy<Value = Vec<(bool, String)>> {
        prop::collection::vec(arb_channel_op(), 0..max)
    }

    /// Keys under the resources the invalidation table names.
    pub fn arb_query_key() -> impl Strategy<Value = QueryKey> {
        let resource = prop::sample::select(vec![
            "users",
            "user",
            "tokens",
            "userJobs",
            "jobs",
            "jobDetail",
            "jobStats",
            "schools",
            "school",
            "alerts",
            "models",
        ]);
        (resource, prop::option::of(arb_id())).prop_map(|(resource, id)| match id {
            Some(id) => QueryKey::new(resource).segment(id),
            None => QueryKey::new(resource),
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use serde_json::{json, Value};

    pub const CREATED_AT: &str = "2024-05-01T08:00:00Z";

    pub fn user(id: &str) -> Value {
        json!({
            "id": id,
            "username": format!("user-{}", id),
            "email": format!("{}@futureguide.id", id),
            "user_type": "user",
            "is_active": true,
            "auth_provider": "email",
            "token_balance": 10,
            "created_at": CREATED_AT,
            "updated_at": CREATED_AT
        })
    }

    pub fn user_detail(id: &str) -> Value {
        json!({
            "user": user(id),
            "statistics": { "jobs": [], "conversations": 2 }
        })
    }

    pub fn user_list(ids: &[&str]) -> Value {
        json!({
            "users": ids.iter().map(|id| user(id)).collect::<Vec<_>>(),
            "pagination": pagination(ids.len() as u64)
        })
    }

    pub fn token_history(balance: i64) -> Value {
        json!({ "currentBalance": balance, "history": [] })
    }

    pub fn school(id: i64, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "city": "Bandung",
            "created_at": CREATED_AT
        })
    }

    pub fn school_list(schools: &[(i64, &str)]) -> Value {
        json!({
            "schools": schools.iter().map(|(id, name)| school(*id, name)).collect::<Vec<_>>(),
            "pagination": pagination(schools.len() as u64)
        })
    }

    pub fn job_stats(total: u64) -> Value {
        json!({
            "overview": {
                "total": total,
                "queued": 0,
                "processing": 0,
                "completed": total,
                "failed": 0,
                "successRate": 100.0,
                "avgProcessingTimeMinutes": "1.50"
            }
        })
    }

    pub fn chatbot_stats() -> Value {
        json!({
            "overview": {
                "totalConversations": 12,
                "totalMessages": 240,
                "activeConversations": 3,
                "avgMessagesPerConversation": 20.0
            },
            "today": { "conversationsToday": 1, "messagesToday": 14 },
            "performance": { "avgResponseTimeMs": 850.0 },
            "tokenUsage": {
                "totalTokens": 90000,
                "totalPromptTokens": 60000,
                "totalCompletionTokens": 30000
            }
        })
    }

    pub fn system_metrics() -> Value {
        json!({
            "users": { "total_users": "1200", "new_users_today": 4, "active_today": "37" },
            "chat": { "total_tokens_used": "90000" },
            "database": { "size": "1 GB" }
        })
    }

    pub fn model_stats() -> Value {
        json!({
            "summary": { "totalModels": 2, "freeModels": 1, "paidModels": 1 },
            "models": [
                {
                    "model": "gemini-flash",
                    "usageCount": 180,
                    "totalTokens": 54000,
                    "avgProcessingTimeMs": 620.0,
                    "isFree": true
                },
                {
                    "model": "gpt-4o",
                    "usageCount": 60,
                    "totalTokens": 36000,
                    "avgProcessingTimeMs": 1400.0,
                    "isFree": false
                }
            ]
        })
    }

    pub fn job(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "job_id": format!("job-{}", id),
            "user_id": "u1",
            "status": status,
            "assessment_name": "AI-Driven Talent Mapping",
            "created_at": CREATED_AT,
            "updated_at": CREATED_AT
        })
    }

    pub fn job_update(job_id: &str, status: &str) -> Value {
        json!({
            "event": "updated",
            "job": job(job_id, status),
            "timestamp": CREATED_AT
        })
    }

    pub fn alert(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "type": "system",
            "severity": "warning",
            "title": "Queue backlog",
            "message": "Job queue above threshold",
            "createdAt": CREATED_AT,
            "status": status
        })
    }

    fn pagination(total: u64) -> Value {
        json!({ "total": total, "page": 1, "limit": 20, "totalPages": 1 })
    }
}
