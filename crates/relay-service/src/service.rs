//! `RelayService` - the explicit service instance held by the transport layer.
//!
//! Wires the Session Registry, the room registry and the lifecycle controller
//! together and dispatches decoded client events:
//!
//! - `join-session` and the negotiation events are handled inline against the
//!   room registry (no controller round-trip)
//! - `start-session` and `end-session` go through the controller mailbox
//!
//! Every handler failure becomes an `error` event to the originating
//! connection only; other participants are never affected.

use crate::actors::{
    ActorMetrics, ControllerDeps, ControllerStatus, SessionControllerHandle, ShutdownSummary,
};
use crate::config::Config;
use crate::errors::RelayError;
use crate::observability::metrics as prom;
use crate::registry::{SessionRegistry, SessionSnapshot};
use crate::signaling::protocol::{EndSession, JoinSession, StartSession};
use crate::signaling::{
    ClientEvent, Connection, ConnectionHandle, IceServer, RoomRegistry, ServerEvent, Signal,
};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Metric label for frames that could not be decoded into an event.
const INVALID_EVENT_LABEL: &str = "invalid";

/// The session relay.
pub struct RelayService {
    relay_id: String,
    controller: SessionControllerHandle,
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    metrics: Arc<ActorMetrics>,
    ice_servers: Vec<IceServer>,
    connection_buffer: usize,
}

impl RelayService {
    /// Create the service and spawn its controller actor.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn init(config: &Config, metrics: Arc<ActorMetrics>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());

        let controller = SessionControllerHandle::new(
            config.relay_id.clone(),
            config.rate_per_minute,
            config.billing_interval,
            ControllerDeps {
                registry: Arc::clone(&registry),
                rooms: Arc::clone(&rooms),
                metrics: Arc::clone(&metrics),
            },
        );

        info!(
            target: "relay.service",
            relay_id = %config.relay_id,
            rate = %config.rate_per_minute,
            ice_servers = config.ice_servers.len(),
            "Relay service initialized"
        );

        Self {
            relay_id: config.relay_id.clone(),
            controller,
            registry,
            rooms,
            metrics,
            ice_servers: config.ice_servers.clone(),
            connection_buffer: config.connection_buffer,
        }
    }

    /// Register a new participant connection.
    ///
    /// The transport drains the returned receiver into the socket.
    #[must_use]
    pub fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (conn, outbound) = Connection::open(self.connection_buffer);
        self.metrics.connection_opened();
        debug!(
            target: "relay.signaling",
            relay_id = %self.relay_id,
            connection_id = %conn.id(),
            "Connection opened"
        );
        (conn, outbound)
    }

    /// Forget a connection: remove it from every room.
    ///
    /// Sessions the participant was part of keep running and billing.
    pub fn disconnect(&self, conn: &ConnectionHandle) {
        let rooms = self.rooms.leave_all(conn.id());
        self.metrics.connection_closed();
        info!(
            target: "relay.signaling",
            relay_id = %self.relay_id,
            connection_id = %conn.id(),
            rooms_left = rooms.len(),
            "Connection closed"
        );
    }

    /// Decode and handle one inbound text frame.
    pub async fn handle_text(&self, conn: &ConnectionHandle, text: &str) {
        let started = Instant::now();
        match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(conn, event).await,
            Err(e) => {
                self.reply_error(conn, INVALID_EVENT_LABEL, &e);
                prom::record_event(INVALID_EVENT_LABEL, started.elapsed());
            }
        }
    }

    /// Handle one decoded event, reporting any failure to the sender.
    pub async fn dispatch(&self, conn: &ConnectionHandle, event: ClientEvent) {
        let started = Instant::now();
        let name = event.event_name();
        if let Err(e) = self.handle_event(conn, event).await {
            self.reply_error(conn, name, &e);
        }
        prom::record_event(name, started.elapsed());
    }

    /// Handle one decoded event.
    ///
    /// # Errors
    ///
    /// - `RelayError::Conflict` for `start-session` on an active session
    /// - `RelayError::Draining` for `start-session` during shutdown
    /// - `RelayError::Internal` if the controller is gone
    pub async fn handle_event(
        &self,
        conn: &ConnectionHandle,
        event: ClientEvent,
    ) -> Result<(), RelayError> {
        match event {
            ClientEvent::JoinSession(join) => {
                self.join_session(conn, join);
                Ok(())
            }
            ClientEvent::Signal(signal) => {
                self.relay(conn, signal);
                Ok(())
            }
            ClientEvent::StartSession(start) => self.start_session(conn, start).await,
            ClientEvent::EndSession(end) => self.end_session(conn, end).await,
        }
    }

    /// Join the sender to the room and announce it to members already present.
    fn join_session(&self, conn: &ConnectionHandle, join: JoinSession) {
        let newly_joined = self.rooms.join(&join.session_id, conn);
        let announcement = ServerEvent::joined(join.role, join.user_id.clone());
        let notified = self
            .rooms
            .broadcast(&join.session_id, Some(conn.id()), &announcement);

        info!(
            target: "relay.signaling",
            relay_id = %self.relay_id,
            connection_id = %conn.id(),
            session_id = %join.session_id,
            user_id = %join.user_id,
            role = join.role.as_str(),
            rejoin = !newly_joined,
            notified,
            "Participant joined session"
        );
    }

    /// Forward a negotiation payload to every other member of the room.
    fn relay(&self, conn: &ConnectionHandle, signal: Signal) {
        let name = signal.kind.event_name();
        let session_id = signal.session_id.clone();
        let delivered = self
            .rooms
            .broadcast(&session_id, Some(conn.id()), &signal.into_server_event());
        prom::record_relayed(name, delivered);

        debug!(
            target: "relay.signaling",
            connection_id = %conn.id(),
            session_id = %session_id,
            event = name,
            delivered,
            "Relayed signaling message"
        );
    }

    async fn start_session(
        &self,
        conn: &ConnectionHandle,
        start: StartSession,
    ) -> Result<(), RelayError> {
        let snapshot = self
            .controller
            .start_session(start.session_id, start.reader_id, start.client_id)
            .await?;

        let ack = ServerEvent::SessionStarted {
            session_id: snapshot.session_id,
        };
        if let Err(e) = conn.deliver(ack) {
            prom::record_delivery_failure(e.metric_label());
            warn!(
                target: "relay.signaling",
                connection_id = %conn.id(),
                error = %e,
                "Failed to acknowledge session start"
            );
        }
        Ok(())
    }

    async fn end_session(
        &self,
        conn: &ConnectionHandle,
        end: EndSession,
    ) -> Result<(), RelayError> {
        // Ending an inactive session is not an error
        self.controller
            .end_session(end.session_id, Some(conn.id()))
            .await
            .map(|_| ())
    }

    fn reply_error(&self, conn: &ConnectionHandle, event: &str, err: &RelayError) {
        prom::record_error(event, err.metric_label());
        warn!(
            target: "relay.signaling",
            relay_id = %self.relay_id,
            connection_id = %conn.id(),
            event,
            error = %err,
            "Event handling failed"
        );
        if let Err(e) = conn.deliver(ServerEvent::error(err)) {
            prom::record_delivery_failure(e.metric_label());
        }
    }

    /// Configured ICE/STUN/TURN servers, returned verbatim.
    #[must_use]
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// Snapshots of every active session.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionSnapshot> {
        self.registry.list()
    }

    /// Snapshot of one active session.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.registry.get(session_id).map(|s| s.snapshot())
    }

    /// Controller status.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the controller is gone.
    pub async fn status(&self) -> Result<ControllerStatus, RelayError> {
        self.controller.get_status().await
    }

    /// Stop accepting sessions, end every active session and cancel all billing timers.
    ///
    /// Waits at most `timeout` for the timer tasks to exit.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the controller is already gone.
    pub async fn shutdown(&self, timeout: Duration) -> Result<ShutdownSummary, RelayError> {
        info!(
            target: "relay.service",
            relay_id = %self.relay_id,
            active_sessions = self.registry.len(),
            "Relay service shutting down"
        );
        self.controller.shutdown(timeout).await
    }
}
