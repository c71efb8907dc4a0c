//! adminsync client
//!
//! The I/O half of the dashboard data layer. A [`SyncContext`] owns one
//! authenticated [`ResourceClient`] over the admin REST API, the shared
//! [`QueryCache`](adminsync_cache::QueryCache) behind every typed read in
//! [`Queries`], the [`MutationDispatcher`] that invalidates affected keys
//! after each write, and an optional realtime manager that keeps the cache
//! in step with server push events.
//!
//! ```ignore
//! adminsync_client::init_tracing()?;
//! let mut ctx = SyncContext::from_env()?;
//! ctx.auth().login(&LoginCredentials::new("admin@futureguide.id", "secret")).await?;
//! let realtime = ctx.start_websocket();
//! let _jobs = realtime.channel("jobs")?;
//! let users = ctx.queries().users(&UserFilters::page(1)).await?;
//! ```

pub mod alerts;
pub mod auth;
pub mod config;
pub mod context;
pub mod credentials;
pub mod mutations;
pub mod queries;
pub mod realtime;
pub mod resource;
pub mod session;
pub mod telemetry;

pub use alerts::{AlertFeed, ALERT_FEED_CAPACITY};
pub use auth::AuthService;
pub use config::{AdminSyncConfig, ConfigError, ReconnectConfig};
pub use context::{ContextError, SyncContext, SyncContextBuilder};
pub use credentials::{
    CredentialError, CredentialStore, FileCredentialStore, MemoryCredentialStore, TOKEN_KEY,
};
pub use mutations::{
    CreateSchool, DeleteSchool, Mutation, MutationDispatcher, UpdateSchool, UpdateTokenBalance,
    UpdateUser,
};
pub use queries::{default_policy, keys, poll_interval, Queries, RECENT_JOBS_LIMIT};
pub use realtime::{
    spawn_realtime, ChannelGuard, ConnectionState, RealtimeConfig, RealtimeError, RealtimeHandle,
    RealtimeManager, Transport, WebSocketTransport,
};
pub use resource::{api_path, Method, ResourceClient};
pub use session::{Navigator, NoopNavigator, SessionGuard};
pub use telemetry::{init_tracing, init_tracing_with, TelemetryConfig};
