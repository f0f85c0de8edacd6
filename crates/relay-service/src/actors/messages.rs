//! Message types for actor communication.
//!
//! All communication with the controller uses strongly-typed message passing
//! via `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use crate::billing::{Amount, BillingTick};
use crate::errors::RelayError;
use crate::registry::SessionSnapshot;

use common::types::ConnectionId;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `SessionControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Move a session to Active and start its billing clock.
    StartSession {
        session_id: String,
        provider_id: String,
        client_id: String,
        /// Response channel for the new session or a conflict.
        respond_to: oneshot::Sender<Result<SessionSnapshot, RelayError>>,
    },

    /// Terminate a session. Ending an absent session is not an error.
    EndSession {
        session_id: String,
        /// Connection that asked for the end; excluded from the `session-ended` broadcast.
        initiator: Option<ConnectionId>,
        /// Response channel for the outcome.
        respond_to: oneshot::Sender<Result<EndOutcome, RelayError>>,
    },

    /// A billing timer fired (sent by the timer task itself).
    BillingTick { tick: BillingTick },

    /// Get current status (for health checks and tests).
    GetStatus {
        /// Response channel for controller status.
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        /// Bound on waiting for billing timers to exit.
        deadline: Duration,
        /// Response channel for the shutdown summary.
        respond_to: oneshot::Sender<Result<ShutdownSummary, RelayError>>,
    },
}

/// Result of an `end-session` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    /// The session was active and is now terminated.
    Ended {
        /// Whole seconds the session was active.
        elapsed_seconds: u64,
        /// Total charge at termination.
        amount: Amount,
        /// Room members notified with `session-ended`.
        notified: usize,
    },
    /// No session with this id was active; nothing changed.
    NotActive,
}

/// Why a session was terminated (bounded metric label).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A participant sent `end-session`.
    Requested,
    /// The relay is shutting down.
    Shutdown,
}

impl EndReason {
    /// Returns the reason as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndReason::Requested => "requested",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Status of the `SessionControllerActor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Active sessions in the registry.
    pub session_count: usize,
    /// Running billing timers.
    pub billing_timers: usize,
    /// Open signaling connections.
    pub connection_count: usize,
    /// Non-empty rooms.
    pub room_count: usize,
    /// Whether the controller stopped accepting new sessions.
    pub is_draining: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}

/// What a graceful shutdown did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Sessions terminated by the shutdown.
    pub sessions_ended: usize,
    /// Billing timers cancelled.
    pub timers_stopped: usize,
}
