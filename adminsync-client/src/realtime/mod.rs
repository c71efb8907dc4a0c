//! Realtime Channel Manager.
//!
//! One multiplexed socket per manager. Channel subscriptions are reference
//! counted and replayed on every (re)connect; inbound named events fan out to
//! registered listeners, one of which keeps the query cache in step with
//! server-side changes.
//!
//! Realtime failures never reach the request/response path: with the socket
//! down the dashboard keeps working in pull mode.

mod driver;
mod listeners;
mod manager;
mod transport;

pub use driver::{spawn_realtime, ChannelGuard, RealtimeHandle};
pub use listeners::{install_cache_listener, Listener, ListenerId, ListenerRegistry, SharedListeners};
pub use manager::{ConnectionState, RealtimeConfig, RealtimeManager};
pub use transport::{Transport, WebSocketTransport};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Realtime is disabled")]
    Disabled,
    #[error("Gave up connecting after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
    #[error("Connection closed")]
    Closed,
}
