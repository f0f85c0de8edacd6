//! WebSocket signaling transport.
//!
//! `GET /ws` upgrades to a WebSocket. Each socket gets one connection in the
//! relay: a writer task drains the connection's outbound queue into the
//! socket while the reader loop feeds every text frame to [`RelayService`].
//! Events from one socket are handled in arrival order.

use crate::routes::AppState;
use crate::service::RelayService;
use crate::signaling::ServerEvent;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let service = Arc::clone(&state.service);
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

#[instrument(skip_all, name = "relay.ws.connection")]
async fn handle_socket(socket: WebSocket, service: Arc<RelayService>) {
    let (conn, outbound) = service.connect();
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_events(sink, outbound));

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => service.handle_text(&conn, &text).await,
                    Some(Ok(Message::Binary(_))) => {
                        debug!(
                            target: "relay.ws",
                            connection_id = %conn.id(),
                            "Ignoring binary frame"
                        );
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "relay.ws",
                            connection_id = %conn.id(),
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                }
            }
            // Writer gone: the socket can no longer carry events
            _ = &mut writer => break,
        }
    }

    service.disconnect(&conn);
    writer.abort();
}

async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = outbound.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "relay.ws",
                    event = event.event_name(),
                    error = %e,
                    "Failed to encode outbound event"
                );
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
