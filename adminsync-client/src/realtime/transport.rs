//! Socket abstraction under the channel manager.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use adminsync_core::Frame;

use super::RealtimeError;

/// A bidirectional stream of [`Frame`]s.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection, presenting `token` as a bearer credential.
    async fn connect(&mut self, url: &str, token: Option<&str>) -> Result<(), RealtimeError>;

    async fn close(&mut self) -> Result<(), RealtimeError>;

    async fn send(&mut self, frame: &Frame) -> Result<(), RealtimeError>;

    /// Next inbound frame. `Ok(None)` means the peer closed the connection.
    async fn recv(&mut self) -> Result<Option<Frame>, RealtimeError>;

    fn is_connected(&self) -> bool;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

/// [`Transport`] over a WebSocket carrying JSON text frames.
#[derive(Default)]
pub struct WebSocketTransport {
    ws: Option<Connection>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.ws.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self, url: &str, token: Option<&str>) -> Result<(), RealtimeError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| RealtimeError::Transport(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();
        self.ws = Some(Connection { sink, stream });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        if let Some(mut ws) = self.ws.take() {
            ws.sink
                .close()
                .await
                .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), RealtimeError> {
        let ws = self.ws.as_mut().ok_or(RealtimeError::Closed)?;
        let text = frame
            .to_text()
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;

        if let Err(e) = ws.sink.send(Message::Text(text)).await {
            self.ws = None;
            return Err(RealtimeError::Transport(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, RealtimeError> {
        let ws = self.ws.as_mut().ok_or(RealtimeError::Closed)?;

        loop {
            match ws.stream.next().await {
                Some(Ok(Message::Text(text))) => match Frame::from_text(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(err) => {
                        tracing::warn!(error = %err, "Dropping undecodable realtime frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.ws = None;
                    return Ok(None);
                }
                // Ping/pong are answered by tungstenite; binary is unused.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.ws = None;
                    return Err(RealtimeError::Transport(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.ws.is_some()
    }
}
