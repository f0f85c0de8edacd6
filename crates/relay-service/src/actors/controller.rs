//! `SessionControllerActor` - the session lifecycle state machine.
//!
//! One controller per relay instance. It is the only writer of the
//! [`SessionRegistry`] and the only owner of the [`BillingClock`], so every
//! lifecycle transition and every billing tick for any session is applied by
//! a single task in mailbox order:
//!
//! - `start-session`: Unstarted -> Active (registry put, then clock start)
//! - `end-session`: Active -> Terminated (clock stop, then registry remove,
//!   then best-effort `session-ended` broadcast)
//! - billing tick: re-enters the mailbox and is broadcast only if the timer
//!   that produced it is still the one registered for an active session
//!
//! Disconnects never reach the controller: a participant dropping off does
//! not end a billed session.
//!
//! # Graceful Shutdown
//!
//! On shutdown, the controller:
//! 1. Sets `accepting_new = false`
//! 2. Ends every active session (broadcasting `session-ended`)
//! 3. Waits, bounded by the deadline, for all billing timer tasks to exit
//! 4. Cancels the root `CancellationToken`

use crate::billing::{BillingClock, BillingRate, BillingTick};
use crate::errors::RelayError;
use crate::observability::metrics as prom;
use crate::registry::{Session, SessionRegistry, SessionSnapshot};
use crate::signaling::{RoomRegistry, ServerEvent};

use super::messages::{
    ControllerMessage, ControllerStatus, EndOutcome, EndReason, ShutdownSummary,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Bound on waiting for billing timers when the controller is cancelled directly.
const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state the controller operates on.
#[derive(Clone)]
pub struct ControllerDeps {
    /// Active sessions (written only by the controller).
    pub registry: Arc<SessionRegistry>,
    /// Room membership used for lifecycle and billing broadcasts.
    pub rooms: Arc<RoomRegistry>,
    /// Shared actor metrics.
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to the `SessionControllerActor`.
///
/// This is the public interface for interacting with the controller.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct SessionControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl SessionControllerHandle {
    /// Create a new `SessionControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `relay_id` - Relay instance ID (log field)
    /// * `rate` - Per-minute billing rate
    /// * `billing_interval` - Interval between billing ticks
    /// * `deps` - Registry, rooms and metrics shared with the service
    #[must_use]
    pub fn new(
        relay_id: String,
        rate: BillingRate,
        billing_interval: Duration,
        deps: ControllerDeps,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionControllerActor::new(
            relay_id,
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            rate,
            billing_interval,
            deps,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Start a session.
    ///
    /// # Errors
    ///
    /// - `RelayError::Conflict` if a session with this id is already active
    /// - `RelayError::Draining` if the relay is shutting down
    /// - `RelayError::Internal` if the controller is gone
    pub async fn start_session(
        &self,
        session_id: String,
        provider_id: String,
        client_id: String,
    ) -> Result<SessionSnapshot, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::StartSession {
                session_id,
                provider_id,
                client_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// End a session. Ending an absent session returns `Ok(EndOutcome::NotActive)`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` only if the controller is gone.
    pub async fn end_session(
        &self,
        session_id: String,
        initiator: Option<ConnectionId>,
    ) -> Result<EndOutcome, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::EndSession {
                session_id,
                initiator,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current controller status.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the controller is gone.
    pub async fn get_status(&self) -> Result<ControllerStatus, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the controller is gone.
    pub async fn shutdown(&self, deadline: Duration) -> Result<ShutdownSummary, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionControllerActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct SessionControllerActor {
    /// Relay instance ID.
    relay_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Weak sender into our own mailbox, handed to billing timers.
    self_sender: mpsc::WeakSender<ControllerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Per-minute billing rate.
    rate: BillingRate,
    /// Billing timers by session id.
    clock: BillingClock,
    /// Whether the controller is accepting new sessions.
    accepting_new: bool,
    /// Active sessions.
    registry: Arc<SessionRegistry>,
    /// Room membership.
    rooms: Arc<RoomRegistry>,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl SessionControllerActor {
    fn new(
        relay_id: String,
        receiver: mpsc::Receiver<ControllerMessage>,
        self_sender: mpsc::WeakSender<ControllerMessage>,
        cancel_token: CancellationToken,
        rate: BillingRate,
        billing_interval: Duration,
        deps: ControllerDeps,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Controller, &relay_id);
        let clock = BillingClock::with_interval(cancel_token.child_token(), billing_interval);

        Self {
            relay_id,
            receiver,
            self_sender,
            cancel_token,
            rate,
            clock,
            accepting_new: true,
            registry: deps.registry,
            rooms: deps.rooms,
            metrics: deps.metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.controller", fields(relay_id = %self.relay_id))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.controller",
            relay_id = %self.relay_id,
            rate = %self.rate,
            "SessionControllerActor started"
        );

        loop {
            // Check for billing timers that died
            self.check_timer_health().await;

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.controller",
                        relay_id = %self.relay_id,
                        "SessionControllerActor received cancellation signal"
                    );
                    if self.accepting_new {
                        self.graceful_shutdown(CANCEL_DRAIN_TIMEOUT).await;
                    }
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.observe(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            // Channel closed, exit
                            info!(
                                target: "relay.actor.controller",
                                relay_id = %self.relay_id,
                                "SessionControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown(CANCEL_DRAIN_TIMEOUT).await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.controller",
            relay_id = %self.relay_id,
            sessions_remaining = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_backlog = self.mailbox.peak_backlog(),
            "SessionControllerActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::StartSession {
                session_id,
                provider_id,
                client_id,
                respond_to,
            } => {
                let result = self.start_session(session_id, provider_id, client_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::EndSession {
                session_id,
                initiator,
                respond_to,
            } => {
                let outcome = self.end_session(&session_id, initiator, EndReason::Requested);
                let _ = respond_to.send(Ok(outcome));
            }

            ControllerMessage::BillingTick { tick } => {
                self.handle_billing_tick(tick);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let status = self.get_status();
                let _ = respond_to.send(status);
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline).await;
                let _ = respond_to.send(result);
            }
        }
    }

    /// Unstarted -> Active.
    fn start_session(
        &mut self,
        session_id: String,
        provider_id: String,
        client_id: String,
    ) -> Result<SessionSnapshot, RelayError> {
        if !self.accepting_new {
            return Err(RelayError::Draining);
        }

        // Don't include the session id in the client-facing message
        if self.registry.contains(&session_id) {
            return Err(RelayError::Conflict("Session already active".to_string()));
        }

        let session = Session::start(session_id, provider_id, client_id);
        let snapshot = session.snapshot();
        let started = session.started;
        self.registry.put(session);

        let started_clock = self.start_billing(&snapshot.session_id, started);
        if !started_clock {
            warn!(
                target: "relay.billing",
                relay_id = %self.relay_id,
                session_id = %snapshot.session_id,
                "Billing timer already running for new session"
            );
        }

        self.metrics.session_started();
        prom::record_session_started();

        info!(
            target: "relay.actor.controller",
            relay_id = %self.relay_id,
            session_id = %snapshot.session_id,
            reader_id = %snapshot.reader_id,
            client_id = %snapshot.client_id,
            total_sessions = self.registry.len(),
            "Session started"
        );

        Ok(snapshot)
    }

    /// Start the billing timer for a session, routing its ticks back through the mailbox.
    fn start_billing(&mut self, session_id: &str, started: Instant) -> bool {
        let mailbox = self.self_sender.clone();
        self.clock.start(session_id, started, self.rate, move |tick| {
            let mailbox = mailbox.clone();
            async move {
                if let Some(sender) = mailbox.upgrade() {
                    let _ = sender.send(ControllerMessage::BillingTick { tick }).await;
                }
            }
        })
    }

    /// Active -> Terminated.
    ///
    /// The clock is stopped before the registry entry is removed, and both
    /// happen before any notification is attempted. Notification failures are
    /// logged by the room registry and never undo the transition.
    fn end_session(
        &mut self,
        session_id: &str,
        initiator: Option<ConnectionId>,
        reason: EndReason,
    ) -> EndOutcome {
        self.clock.stop(session_id);

        let Some(mut session) = self.registry.take(session_id) else {
            debug!(
                target: "relay.actor.controller",
                relay_id = %self.relay_id,
                session_id = %session_id,
                "end-session for inactive session ignored"
            );
            return EndOutcome::NotActive;
        };
        session.active = false;

        let elapsed = session.started.elapsed();
        let elapsed_seconds = elapsed.as_secs();
        let amount = self.rate.amount_for(elapsed_seconds);

        self.metrics.session_ended();
        prom::record_session_ended(reason.as_str());
        prom::record_session_duration(elapsed);

        let notified = self
            .rooms
            .broadcast(session_id, initiator, &ServerEvent::SessionEnded);

        info!(
            target: "relay.actor.controller",
            relay_id = %self.relay_id,
            session_id = %session_id,
            reason = reason.as_str(),
            duration = elapsed_seconds,
            amount = %amount,
            notified,
            total_sessions = self.registry.len(),
            "Session ended"
        );

        EndOutcome::Ended {
            elapsed_seconds,
            amount,
            notified,
        }
    }

    /// Broadcast a billing tick to every member of the session's room.
    ///
    /// A tick from a stopped timer (delivered while `end-session` was being
    /// processed) or from a previous session with the same id is dropped.
    fn handle_billing_tick(&mut self, tick: BillingTick) {
        if !self.clock.is_current(&tick) || !self.registry.contains(&tick.session_id) {
            prom::record_billing_tick_discarded();
            debug!(
                target: "relay.billing",
                relay_id = %self.relay_id,
                session_id = %tick.session_id,
                "Discarded billing tick for ended session"
            );
            return;
        }

        let event = ServerEvent::BillingUpdate {
            duration: tick.elapsed_seconds,
            amount: tick.amount.to_string(),
        };
        let delivered = self.rooms.broadcast(&tick.session_id, None, &event);
        prom::record_billing_tick();

        debug!(
            target: "relay.billing",
            relay_id = %self.relay_id,
            session_id = %tick.session_id,
            duration = tick.elapsed_seconds,
            amount = %tick.amount,
            delivered,
            "Billing update"
        );
    }

    /// Get current controller status.
    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            session_count: self.registry.len(),
            billing_timers: self.clock.len(),
            connection_count: self.metrics.connection_count(),
            room_count: self.rooms.room_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.receiver.len(),
        }
    }

    /// Initiate graceful shutdown.
    async fn initiate_shutdown(
        &mut self,
        deadline: Duration,
    ) -> Result<ShutdownSummary, RelayError> {
        info!(
            target: "relay.actor.controller",
            relay_id = %self.relay_id,
            session_count = self.registry.len(),
            "Initiating graceful shutdown"
        );

        let summary = self.graceful_shutdown(deadline).await;

        // Cancel the root token (stops the loop)
        self.cancel_token.cancel();

        Ok(summary)
    }

    /// End every session and wait for the billing timers to exit.
    async fn graceful_shutdown(&mut self, deadline: Duration) -> ShutdownSummary {
        // Stop accepting new sessions
        self.accepting_new = false;

        let mut sessions_ended = 0;
        for session_id in self.registry.ids() {
            let outcome = self.end_session(&session_id, None, EndReason::Shutdown);
            if let EndOutcome::Ended { .. } = outcome {
                sessions_ended += 1;
            }
        }

        let timers_stopped = self.clock.stop_all(deadline).await;

        info!(
            target: "relay.actor.controller",
            relay_id = %self.relay_id,
            sessions_ended,
            timers_stopped,
            "Graceful shutdown complete"
        );

        ShutdownSummary {
            sessions_ended,
            timers_stopped,
        }
    }

    /// Restart billing timers that exited while their session is still active.
    async fn check_timer_health(&mut self) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        for reaped in self.clock.reap_finished().await {
            if reaped.panicked {
                self.metrics.record_panic(ActorType::BillingTimer);
            }

            // Keep the invariant: an active session always has a running timer.
            if let Some(session) = self.registry.get(&reaped.session_id) {
                warn!(
                    target: "relay.billing",
                    relay_id = %self.relay_id,
                    session_id = %reaped.session_id,
                    panicked = reaped.panicked,
                    "Restarting billing timer for active session"
                );
                self.start_billing(&session.id, session.started);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::billing::BILLING_INTERVAL;
    use crate::signaling::{Connection, ConnectionHandle};
    use tokio::sync::mpsc::Receiver;

    struct Fixture {
        handle: SessionControllerHandle,
        registry: Arc<SessionRegistry>,
        rooms: Arc<RoomRegistry>,
    }

    fn fixture(relay_id: &str) -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let handle = SessionControllerHandle::new(
            relay_id.to_string(),
            BillingRate::from_cents(200),
            BILLING_INTERVAL,
            ControllerDeps {
                registry: Arc::clone(&registry),
                rooms: Arc::clone(&rooms),
                metrics: ActorMetrics::new(),
            },
        );
        Fixture {
            handle,
            registry,
            rooms,
        }
    }

    fn member(rooms: &RoomRegistry, room: &str) -> (ConnectionHandle, Receiver<ServerEvent>) {
        let (conn, rx) = Connection::open(32);
        rooms.join(room, &conn);
        (conn, rx)
    }

    /// Let the controller and timer tasks run after the clock moved.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn start(
        handle: &SessionControllerHandle,
        id: &str,
    ) -> Result<SessionSnapshot, RelayError> {
        handle
            .start_session(
                id.to_string(),
                "reader-1".to_string(),
                "client-1".to_string(),
            )
            .await
    }

    #[tokio::test]
    async fn test_start_session_registers_and_starts_billing() {
        let f = fixture("relay-test-001");

        let snapshot = start(&f.handle, "s1").await.unwrap();
        assert_eq!(snapshot.session_id, "s1");
        assert_eq!(snapshot.reader_id, "reader-1");
        assert!(f.registry.contains("s1"));

        let status = f.handle.get_status().await.unwrap();
        assert_eq!(status.session_count, 1);
        assert_eq!(status.billing_timers, 1);
        assert!(!status.is_draining);

        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_start_is_conflict_and_keeps_original() {
        let f = fixture("relay-test-002");

        start(&f.handle, "s1").await.unwrap();
        let original = f.registry.get("s1").unwrap();

        let result = f
            .handle
            .start_session("s1".to_string(), "other".to_string(), "other".to_string())
            .await;
        assert!(matches!(result, Err(RelayError::Conflict(_))));

        let current = f.registry.get("s1").unwrap();
        assert_eq!(current.provider_id, original.provider_id);
        assert_eq!(current.started, original.started);
        assert_eq!(f.handle.get_status().await.unwrap().billing_timers, 1);

        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_starts_yield_one_session() {
        let f = fixture("relay-test-003");

        let attempts: Vec<_> = (0..16)
            .map(|i| {
                let handle = f.handle.clone();
                tokio::spawn(async move {
                    handle
                        .start_session(
                            "s1".to_string(),
                            format!("reader-{i}"),
                            "client".to_string(),
                        )
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut conflicts = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RelayError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
        let status = f.handle.get_status().await.unwrap();
        assert_eq!(status.session_count, 1);
        assert_eq!(status.billing_timers, 1);

        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_end_session_removes_and_notifies_others() {
        let f = fixture("relay-test-004");
        let (ender, mut ender_rx) = member(&f.rooms, "s1");
        let (_other, mut other_rx) = member(&f.rooms, "s1");

        start(&f.handle, "s1").await.unwrap();
        let outcome = f
            .handle
            .end_session("s1".to_string(), Some(ender.id()))
            .await
            .unwrap();

        assert!(matches!(outcome, EndOutcome::Ended { notified: 1, .. }));
        assert!(!f.registry.contains("s1"));
        assert_eq!(other_rx.try_recv().unwrap(), ServerEvent::SessionEnded);
        assert!(ender_rx.try_recv().is_err());
        assert_eq!(f.handle.get_status().await.unwrap().billing_timers, 0);

        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_end_inactive_session_is_noop() {
        let f = fixture("relay-test-005");
        let (_member, mut rx) = member(&f.rooms, "missing");

        let outcome = f
            .handle
            .end_session("missing".to_string(), None)
            .await
            .unwrap();
        assert_eq!(outcome, EndOutcome::NotActive);
        assert!(
            rx.try_recv().is_err(),
            "no session-ended for an absent session"
        );

        // Repeated end after a real end is also a no-op
        start(&f.handle, "s1").await.unwrap();
        assert!(matches!(
            f.handle.end_session("s1".to_string(), None).await.unwrap(),
            EndOutcome::Ended { .. }
        ));
        assert_eq!(
            f.handle.end_session("s1".to_string(), None).await.unwrap(),
            EndOutcome::NotActive
        );

        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_billing_updates_reach_every_member() {
        let f = fixture("relay-test-006");
        let (_reader, mut reader_rx) = member(&f.rooms, "s1");
        let (_client, mut client_rx) = member(&f.rooms, "s1");

        start(&f.handle, "s1").await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        let expected = ServerEvent::BillingUpdate {
            duration: 60,
            amount: "2.00".to_string(),
        };
        assert_eq!(reader_rx.try_recv().unwrap(), expected);
        assert_eq!(client_rx.try_recv().unwrap(), expected);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        let expected = ServerEvent::BillingUpdate {
            duration: 120,
            amount: "4.00".to_string(),
        };
        assert_eq!(reader_rx.try_recv().unwrap(), expected);

        f.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_billing_update_after_end() {
        let f = fixture("relay-test-007");
        let (_member, mut rx) = member(&f.rooms, "s1");

        start(&f.handle, "s1").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        f.handle.end_session("s1".to_string(), None).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::SessionEnded);

        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;
        assert!(rx.try_recv().is_err(), "ended session must not bill");

        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_stale_tick_is_discarded() {
        let f = fixture("relay-test-008");
        let (_member, mut rx) = member(&f.rooms, "s1");

        start(&f.handle, "s1").await.unwrap();
        f.handle.end_session("s1".to_string(), None).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::SessionEnded);

        // A tick that was in flight when the session ended
        f.handle
            .sender
            .send(ControllerMessage::BillingTick {
                tick: BillingTick {
                    session_id: "s1".to_string(),
                    generation: 1,
                    elapsed_seconds: 60,
                    amount: BillingRate::from_cents(200).amount_for(60),
                },
            })
            .await
            .unwrap();
        f.handle.get_status().await.unwrap();

        assert!(rx.try_recv().is_err());

        f.handle.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_ends_sessions_and_stops_timers() {
        let f = fixture("relay-test-009");
        let (_member, mut rx) = member(&f.rooms, "s1");

        start(&f.handle, "s1").await.unwrap();
        start(&f.handle, "s2").await.unwrap();

        let summary = f.handle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(summary.sessions_ended, 2);
        assert!(f.registry.is_empty());
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::SessionEnded);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_rejected() {
        let f = fixture("relay-test-010");

        // Cancel stops the loop; later requests fail instead of hanging
        f.handle.shutdown(Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = start(&f.handle, "s1").await;
        assert!(result.is_err());
        assert!(!f.registry.contains("s1"));
    }
}
