//! Session Relay error types.
//!
//! Every error maps to a client-safe message carried by the outbound `error`
//! event. Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Session Relay error type.
///
/// Error classes:
/// - `Protocol`: malformed or incomplete inbound event, reported to the sender only
/// - `Conflict`: `start-session` for an id that is already active
/// - `SessionNotFound`: lookup of an id that is not active (never surfaced by `end-session`)
/// - `Delivery`, `ConnectionClosed`: outbound queue failures, logged and never propagated
///   into the lifecycle path
/// - `Draining`, `Internal`: service-level failures
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound event could not be decoded or is missing a required field.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Session already active for this id.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Outbound queue for a connection is full.
    #[error("Outbound queue full for connection {0}")]
    Delivery(String),

    /// Outbound queue for a connection has been closed (peer went away).
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Relay is shutting down and no longer accepts new sessions.
    #[error("Relay is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Protocol(msg) | RelayError::Conflict(msg) => msg.clone(),
            RelayError::SessionNotFound(_) => "Session not found".to_string(),
            RelayError::Draining => "Server is shutting down, please reconnect".to_string(),
            RelayError::Delivery(_) | RelayError::ConnectionClosed(_) | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Returns a bounded label for metrics.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            RelayError::Protocol(_) => "protocol",
            RelayError::Conflict(_) => "conflict",
            RelayError::SessionNotFound(_) => "not_found",
            RelayError::Delivery(_) => "backpressure",
            RelayError::ConnectionClosed(_) => "closed",
            RelayError::Draining => "draining",
            RelayError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = RelayError::Internal("controller mailbox closed at 10.0.0.4".to_string());
        assert!(!err.client_message().contains("10.0.0.4"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RelayError::Delivery("5b0f1c9e".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RelayError::SessionNotFound("session-secret-id".to_string());
        assert!(!err.client_message().contains("secret"));
    }

    #[test]
    fn test_protocol_and_conflict_messages_are_passed_through() {
        let err = RelayError::Protocol("Invalid offer payload".to_string());
        assert_eq!(err.client_message(), "Invalid offer payload");

        let err = RelayError::Conflict("Session already active".to_string());
        assert_eq!(err.client_message(), "Session already active");
    }

    #[test]
    fn test_metric_labels_are_bounded() {
        let labels = [
            RelayError::Protocol(String::new()).metric_label(),
            RelayError::Conflict(String::new()).metric_label(),
            RelayError::SessionNotFound(String::new()).metric_label(),
            RelayError::Delivery(String::new()).metric_label(),
            RelayError::ConnectionClosed(String::new()).metric_label(),
            RelayError::Draining.metric_label(),
            RelayError::Internal(String::new()).metric_label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn test_display_formatting() {
        let conflict = RelayError::Conflict("Session already active".to_string());
        assert_eq!(conflict.to_string(), "Conflict: Session already active");
        assert_eq!(format!("{}", RelayError::Draining), "Relay is draining");
    }
}
