//! WebSocket signaling client for E2E testing
//!
//! Provides `TestSignalingClient`, which speaks the relay's
//! `{"event": ..., "data": ...}` protocol over a real socket.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long `recv_event` waits before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `expect_no_event` listens for an unexpected event.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub event: String,
    pub data: Value,
}

/// Signaling client connected to a test relay.
pub struct TestSignalingClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestSignalingClient {
    /// Connect to `ws_url` (see `TestRelayServer::ws_url`).
    pub async fn connect(ws_url: &str) -> Result<Self, anyhow::Error> {
        let (socket, _response) = connect_async(ws_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", ws_url, e))?;
        Ok(Self { socket })
    }

    /// Send an event with a JSON payload.
    pub async fn send_event(&mut self, event: &str, data: Value) -> Result<(), anyhow::Error> {
        self.send_raw(&json!({ "event": event, "data": data }).to_string())
            .await
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.socket
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send frame: {}", e))
    }

    /// `join-session` shorthand.
    pub async fn join(
        &mut self,
        session_id: &str,
        user_id: &str,
        role: &str,
    ) -> Result<(), anyhow::Error> {
        self.send_event(
            "join-session",
            json!({ "sessionId": session_id, "userId": user_id, "role": role }),
        )
        .await
    }

    /// `start-session` shorthand.
    pub async fn start_session(
        &mut self,
        session_id: &str,
        reader_id: &str,
        client_id: &str,
    ) -> Result<(), anyhow::Error> {
        self.send_event(
            "start-session",
            json!({ "sessionId": session_id, "readerId": reader_id, "clientId": client_id }),
        )
        .await
    }

    /// `end-session` shorthand.
    pub async fn end_session(&mut self, session_id: &str) -> Result<(), anyhow::Error> {
        self.send_event("end-session", json!({ "sessionId": session_id }))
            .await
    }

    /// Wait for the next event, failing after `RECV_TIMEOUT`.
    pub async fn recv_event(&mut self) -> Result<ReceivedEvent, anyhow::Error> {
        self.recv_event_within(RECV_TIMEOUT).await
    }

    /// Wait for the next event, failing after `timeout`.
    pub async fn recv_event_within(
        &mut self,
        timeout: Duration,
    ) -> Result<ReceivedEvent, anyhow::Error> {
        tokio::time::timeout(timeout, self.next_event())
            .await
            .map_err(|_| anyhow::anyhow!("No event within {:?}", timeout))?
    }

    /// Wait for the next event named `event`, skipping any others.
    pub async fn recv_named(&mut self, event: &str) -> Result<ReceivedEvent, anyhow::Error> {
        loop {
            let received = self.recv_event().await?;
            if received.event == event {
                return Ok(received);
            }
        }
    }

    /// Assert that nothing arrives during `QUIET_PERIOD`.
    ///
    /// # Panics
    ///
    /// Panics with the unexpected event if one arrives.
    pub async fn expect_no_event(&mut self) {
        if let Ok(Ok(event)) = tokio::time::timeout(QUIET_PERIOD, self.next_event()).await {
            panic!("Expected no event, got {:?}", event);
        }
    }

    /// Close the socket.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket
            .close(None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to close socket: {}", e))
    }

    async fn next_event(&mut self) -> Result<ReceivedEvent, anyhow::Error> {
        loop {
            let frame = self
                .socket
                .next()
                .await
                .ok_or_else(|| anyhow::anyhow!("Socket closed"))?
                .map_err(|e| anyhow::anyhow!("Failed to read frame: {}", e))?;

            match frame {
                Message::Text(text) => {
                    let mut value: Value = serde_json::from_str(&text)?;
                    let event = value
                        .get("event")
                        .and_then(Value::as_str)
                        .ok_or_else(|| anyhow::anyhow!("Frame without event name: {}", text))?
                        .to_string();
                    let data = value.get_mut("data").map_or(Value::Null, Value::take);
                    return Ok(ReceivedEvent { event, data });
                }
                Message::Close(_) => return Err(anyhow::anyhow!("Socket closed")),
                _ => {}
            }
        }
    }
}
