//! Connection state machine and channel reference counts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adminsync_core::Frame;
use tokio::sync::watch;

use super::listeners::SharedListeners;
use super::transport::Transport;
use super::RealtimeError;
use crate::config::{AdminSyncConfig, ReconnectConfig};
use crate::credentials::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub endpoint: String,
    pub enabled: bool,
    pub auto_connect: bool,
    pub reconnect: ReconnectConfig,
}

impl RealtimeConfig {
    pub fn from_config(config: &AdminSyncConfig) -> Self {
        Self {
            endpoint: config.ws_endpoint(),
            enabled: config.ws_enabled,
            auto_connect: config.auto_connect,
            reconnect: config.reconnect.clone(),
        }
    }
}

/// Owns the transport, the subscription table and the connection state.
///
/// Driven either directly (`&mut self` calls) or from its own task through
/// [`spawn_realtime`](super::spawn_realtime).
pub struct RealtimeManager<T: Transport> {
    pub(super) transport: T,
    config: RealtimeConfig,
    credentials: Arc<dyn CredentialStore>,
    subscriptions: BTreeMap<String, usize>,
    listeners: SharedListeners,
    state: watch::Sender<ConnectionState>,
    desired: bool,
}

impl<T: Transport> fmt::Debug for RealtimeManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions)
            .field("desired", &self.desired)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RealtimeManager<T> {
    pub fn new(transport: T, config: RealtimeConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            config,
            credentials,
            subscriptions: BTreeMap::new(),
            listeners: SharedListeners::new(),
            state,
            desired: false,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn listeners(&self) -> SharedListeners {
        self.listeners.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the manager is trying to stay connected.
    pub fn is_desired(&self) -> bool {
        self.desired
    }

    pub fn ref_count(&self, channel: &str) -> usize {
        self.subscriptions.get(channel).copied().unwrap_or(0)
    }

    /// Channels with at least one holder, in order.
    pub fn channels(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    // ========================================================================
    // CONNECTION
    // ========================================================================

    /// Connect, retrying with capped backoff up to `max_attempts`.
    ///
    /// With realtime disabled this only logs.
    pub async fn connect(&mut self) -> Result<(), RealtimeError> {
        if !self.config.enabled {
            tracing::info!("Realtime disabled; staying in pull mode");
            return Ok(());
        }
        if self.is_connected() {
            return Ok(());
        }
        self.desired = true;
        self.connect_with_retry().await
    }

    /// Close the socket and stop reconnecting. Subscriptions are kept and
    /// replayed on the next connect.
    pub async fn disconnect(&mut self) {
        self.desired = false;
        if self.transport.is_connected() {
            if let Err(err) = self.transport.close().await {
                tracing::debug!(error = %err, "Error while closing realtime transport");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect_with_retry(&mut self) -> Result<(), RealtimeError> {
        let reconnect = self.config.reconnect.clone();
        let mut backoff = reconnect.initial_ms;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.try_connect().await {
                Ok(()) => {
                    tracing::info!(
                        endpoint = %self.config.endpoint,
                        attempt,
                        channels = self.subscriptions.len(),
                        "Realtime connected"
                    );
                    return Ok(());
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    if attempt >= reconnect.max_attempts {
                        self.desired = false;
                        tracing::error!(attempts = attempt, error = %err, "Giving up on realtime connection");
                        return Err(RealtimeError::MaxRetriesExceeded { attempts: attempt });
                    }
                    let delay = jittered_backoff(backoff, reconnect.jitter_ms);
                    tracing::warn!(attempt, error = %err, delay_ms = delay, "Realtime connect failed; retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    backoff = next_backoff(backoff, &reconnect);
                }
            }
        }
    }

    async fn try_connect(&mut self) -> Result<(), RealtimeError> {
        self.set_state(ConnectionState::Connecting);
        let token = self.credentials.token();
        let timeout = self.config.reconnect.connect_timeout();

        let connect = self.transport.connect(&self.config.endpoint, token.as_deref());
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RealtimeError::Transport(format!(
                    "connect timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }

        if let Err(err) = self.replay_subscriptions().await {
            let _ = self.transport.close().await;
            return Err(err);
        }
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Join every channel with holders, once each.
    async fn replay_subscriptions(&mut self) -> Result<(), RealtimeError> {
        let channels = self.channels();
        for channel in &channels {
            self.transport.send(&Frame::subscribe(channel)).await?;
        }
        if !channels.is_empty() {
            tracing::debug!(channels = ?channels, "Replayed subscriptions");
        }
        Ok(())
    }

    /// The transport dropped. Reconnect if still wanted.
    pub(super) async fn connection_lost(&mut self, reason: &str) {
        tracing::warn!(reason, desired = self.desired, "Realtime connection lost");
        if self.transport.is_connected() {
            let _ = self.transport.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        if self.desired {
            if let Err(err) = self.connect_with_retry().await {
                tracing::warn!(error = %err, "Realtime stays down; pull mode only");
            }
        }
    }

    // ========================================================================
    // CHANNELS
    // ========================================================================

    /// Take a reference on `channel`. The join is sent on the first
    /// reference, now if connected or on the next connect otherwise. Returns
    /// the new count.
    pub async fn subscribe(&mut self, channel: &str) -> usize {
        let count = {
            let count = self.subscriptions.entry(channel.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count == 1 {
            if self.is_connected() {
                if let Err(err) = self.transport.send(&Frame::subscribe(channel)).await {
                    // Reconnecting replays the join.
                    self.connection_lost(&err.to_string()).await;
                } else {
                    tracing::debug!(channel, "Joined channel");
                }
            } else {
                tracing::debug!(channel, "Join deferred until connected");
            }
        }
        count
    }

    /// Release a reference on `channel`. The leave is sent once, when the
    /// count reaches zero, and not retried. Unknown channels are ignored.
    pub async fn unsubscribe(&mut self, channel: &str) -> usize {
        let Some(count) = self.subscriptions.get_mut(channel) else {
            tracing::debug!(channel, "Unsubscribe from unknown channel ignored");
            return 0;
        };
        *count -= 1;
        if *count > 0 {
            return *count;
        }

        self.subscriptions.remove(channel);
        if self.is_connected() {
            match self.transport.send(&Frame::unsubscribe(channel)).await {
                Ok(()) => tracing::debug!(channel, "Left channel"),
                Err(err) => tracing::warn!(channel, error = %err, "Failed to send leave; not retried"),
            }
        }
        0
    }

    /// Send an arbitrary named event.
    pub async fn emit(&mut self, event: &str, data: serde_json::Value) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::Closed);
        }
        let frame = Frame::new(event, data);
        if let Err(err) = self.transport.send(&frame).await {
            self.connection_lost(&err.to_string()).await;
            return Err(err);
        }
        tracing::trace!(event, "Emitted realtime event");
        Ok(())
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    /// Hand a frame to its listeners. Returns how many ran.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let delivered = self.listeners.dispatch(frame);
        tracing::trace!(event = %frame.event, delivered, "Dispatched realtime event");
        delivered
    }

    /// Receive and dispatch one inbound frame, reconnecting if the transport
    /// dropped.
    pub async fn pump(&mut self) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::Closed);
        }
        let inbound = self.transport.recv().await;
        self.on_inbound(inbound).await;
        Ok(())
    }

    pub(super) async fn on_inbound(&mut self, inbound: Result<Option<Frame>, RealtimeError>) {
        match inbound {
            Ok(Some(frame)) => {
                self.dispatch(&frame);
            }
            Ok(None) => self.connection_lost("closed by peer").await,
            Err(err) => self.connection_lost(&err.to_string()).await,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Realtime state changed");
        }
    }
}

fn next_backoff(current_ms: u64, reconnect: &ReconnectConfig) -> u64 {
    let next = (current_ms as f64 * reconnect.multiplier) as u64;
    next.clamp(reconnect.initial_ms, reconnect.max_ms)
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}
