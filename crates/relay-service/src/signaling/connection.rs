//! Outbound side of one participant connection.
//!
//! The transport task owns the receiving end of a bounded queue and writes
//! every [`ServerEvent`] to the socket in order. Everything else in the relay
//! only ever holds a [`ConnectionHandle`] and enqueues without waiting.

use super::protocol::ServerEvent;
use crate::errors::RelayError;

use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Shared handle to a connection's outbound queue.
pub type ConnectionHandle = Arc<Connection>;

/// Identity plus outbound queue of a connected participant.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Connection {
    /// Open a connection with an outbound queue of `buffer` events.
    #[must_use]
    pub fn open(buffer: usize) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            outbound,
        });
        (connection, receiver)
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue an event without waiting.
    ///
    /// # Errors
    ///
    /// - `RelayError::Delivery` if the queue is full (slow reader)
    /// - `RelayError::ConnectionClosed` if the transport task has gone away
    pub fn deliver(&self, event: ServerEvent) -> Result<(), RelayError> {
        self.outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::Delivery(self.id.to_string()),
            TrySendError::Closed(_) => RelayError::ConnectionClosed(self.id.to_string()),
        })
    }

    /// Whether the transport task has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_preserves_order() {
        let (conn, mut rx) = Connection::open(8);

        for duration in [1, 2, 3] {
            conn.deliver(ServerEvent::BillingUpdate {
                duration,
                amount: "0.00".to_string(),
            })
            .unwrap();
        }

        for expected in [1, 2, 3] {
            match rx.recv().await.unwrap() {
                ServerEvent::BillingUpdate { duration, .. } => assert_eq!(duration, expected),
                other => unreachable!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_full_queue_is_delivery_error() {
        let (conn, _rx) = Connection::open(1);
        conn.deliver(ServerEvent::SessionEnded).unwrap();

        let err = conn.deliver(ServerEvent::SessionEnded).unwrap_err();
        assert!(matches!(err, RelayError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_closed_queue_is_connection_closed() {
        let (conn, rx) = Connection::open(4);
        drop(rx);

        assert!(conn.is_closed());
        let err = conn.deliver(ServerEvent::SessionEnded).unwrap_err();
        assert!(matches!(err, RelayError::ConnectionClosed(_)));
    }
}
