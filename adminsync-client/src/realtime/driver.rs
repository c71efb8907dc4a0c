//! Runs a manager on its own task and hands out cloneable handles.

use adminsync_core::Frame;
use tokio::sync::{mpsc, watch};

use super::listeners::{ListenerId, SharedListeners};
use super::manager::{ConnectionState, RealtimeManager};
use super::transport::Transport;
use super::RealtimeError;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Subscribe(String),
    Unsubscribe(String),
    Emit(Frame),
    Shutdown,
}

/// Move `manager` onto a task. Commands from every handle are applied in
/// order; inbound frames are dispatched as they arrive.
pub fn spawn_realtime<T>(manager: RealtimeManager<T>) -> RealtimeHandle
where
    T: Transport + 'static,
{
    let (commands, receiver) = mpsc::unbounded_channel();
    let handle = RealtimeHandle {
        commands,
        state: manager.watch_state(),
        listeners: manager.listeners(),
    };
    tokio::spawn(manager.run(receiver));
    handle
}

impl<T: Transport> RealtimeManager<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if self.config().enabled && self.config().auto_connect {
            if let Err(err) = self.connect().await {
                tracing::warn!(error = %err, "Realtime auto-connect failed");
            }
        }

        loop {
            let connected = self.is_connected();
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.execute(command).await,
                },
                inbound = self.transport.recv(), if connected => {
                    self.on_inbound(inbound).await;
                }
            }
        }

        self.disconnect().await;
        tracing::info!("Realtime manager stopped");
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if let Err(err) = self.connect().await {
                    tracing::warn!(error = %err, "Realtime connect failed");
                }
            }
            Command::Disconnect => self.disconnect().await,
            Command::Subscribe(channel) => {
                self.subscribe(&channel).await;
            }
            Command::Unsubscribe(channel) => {
                self.unsubscribe(&channel).await;
            }
            Command::Emit(frame) => {
                if let Err(err) = self.emit(&frame.event, frame.data).await {
                    tracing::debug!(event = %frame.event, error = %err, "Realtime emit dropped");
                }
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }
}

/// Cloneable front end to a running manager.
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    listeners: SharedListeners,
}

impl RealtimeHandle {
    pub fn connect(&self) -> Result<(), RealtimeError> {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), RealtimeError> {
        self.send(Command::Disconnect)
    }

    pub fn subscribe(&self, channel: impl Into<String>) -> Result<(), RealtimeError> {
        self.send(Command::Subscribe(channel.into()))
    }

    pub fn unsubscribe(&self, channel: impl Into<String>) -> Result<(), RealtimeError> {
        self.send(Command::Unsubscribe(channel.into()))
    }

    pub fn emit(&self, event: impl Into<String>, data: serde_json::Value) -> Result<(), RealtimeError> {
        self.send(Command::Emit(Frame::new(event, data)))
    }

    /// Stop the manager task. The socket is closed.
    pub fn shutdown(&self) -> Result<(), RealtimeError> {
        self.send(Command::Shutdown)
    }

    /// Hold `channel` for as long as the guard lives.
    pub fn channel(&self, channel: impl Into<String>) -> Result<ChannelGuard, RealtimeError> {
        let channel = channel.into();
        self.subscribe(channel.clone())?;
        Ok(ChannelGuard {
            handle: self.clone(),
            channel,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Resolve once the manager reaches `target`.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), RealtimeError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| RealtimeError::Closed)
    }

    pub fn listeners(&self) -> &SharedListeners {
        &self.listeners
    }

    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.listeners.on(event, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    fn send(&self, command: Command) -> Result<(), RealtimeError> {
        self.commands.send(command).map_err(|_| RealtimeError::Closed)
    }
}

/// A reference on a channel, released on drop.
#[derive(Debug)]
pub struct ChannelGuard {
    handle: RealtimeHandle,
    channel: String,
}

impl ChannelGuard {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if self.handle.unsubscribe(self.channel.clone()).is_err() {
            tracing::debug!(channel = %self.channel, "Realtime manager gone; nothing to release");
        }
    }
}
