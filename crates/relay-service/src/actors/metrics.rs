//! Actor metrics and mailbox monitoring.
//!
//! The controller samples its own backlog after every message it takes off
//! the mailbox:
//!
//! | Backlog    | Level    | Logged at |
//! |------------|----------|-----------|
//! | < 100      | Normal   | info (on recovery) |
//! | 100 - 500  | Elevated | debug |
//! | > 500      | Critical | warn  |
//!
//! Only level changes are logged. The gauges kept by [`ActorMetrics`] mirror
//! the `relay_*_active` gauges exported on `/metrics`.

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Backlog at which the controller mailbox is considered elevated.
pub const MAILBOX_ELEVATED: usize = 100;

/// Backlog above which the controller mailbox is considered critical.
pub const MAILBOX_CRITICAL: usize = 500;

/// Task kind for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionControllerActor` (one per relay instance).
    Controller,
    /// Billing timer task (one per active session).
    BillingTimer,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::BillingTimer => "billing_timer",
        }
    }
}

/// Mailbox backlog classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

impl MailboxLevel {
    #[must_use]
    pub const fn for_backlog(backlog: usize) -> Self {
        if backlog > MAILBOX_CRITICAL {
            MailboxLevel::Critical
        } else if backlog >= MAILBOX_ELEVATED {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Backlog tracker owned by a single actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    backlog: usize,
    peak_backlog: usize,
    level: MailboxLevel,
    messages_processed: u64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            backlog: 0,
            peak_backlog: 0,
            level: MailboxLevel::Normal,
            messages_processed: 0,
        }
    }

    /// Record one dequeued message and the backlog still waiting behind it.
    pub fn observe(&mut self, backlog: usize) {
        self.messages_processed += 1;
        self.backlog = backlog;
        self.peak_backlog = self.peak_backlog.max(backlog);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), backlog);

        let level = MailboxLevel::for_backlog(backlog);
        if level == self.level {
            return;
        }
        let previous = std::mem::replace(&mut self.level, level);

        match level {
            MailboxLevel::Critical => warn!(
                target: "relay.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                threshold = MAILBOX_CRITICAL,
                "Mailbox backlog critical"
            ),
            MailboxLevel::Elevated if previous == MailboxLevel::Normal => debug!(
                target: "relay.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                "Mailbox backlog elevated"
            ),
            MailboxLevel::Elevated => {}
            MailboxLevel::Normal => info!(
                target: "relay.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                peak_backlog = self.peak_backlog,
                "Mailbox backlog recovered"
            ),
        }
    }

    /// Backlog at the last observation.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog
    }

    #[must_use]
    pub fn peak_backlog(&self) -> usize {
        self.peak_backlog
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        self.level
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }
}

/// Relay-wide gauges shared by the controller and the connection layer.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_sessions: AtomicUsize,
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_started(&self) {
        prom::set_sessions_active(increment(&self.active_sessions));
    }

    pub fn session_ended(&self) {
        prom::set_sessions_active(decrement(&self.active_sessions));
    }

    pub fn connection_opened(&self) {
        prom::set_connections_active(increment(&self.active_connections));
    }

    pub fn connection_closed(&self) {
        prom::set_connections_active(decrement(&self.active_connections));
    }

    /// Count a panicked task. Any panic is a bug.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        error!(
            target: "relay.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}

fn increment(gauge: &AtomicUsize) -> u64 {
    (gauge.fetch_add(1, Ordering::Relaxed) + 1) as u64
}

/// Never wraps below zero, even on an unmatched decrement.
fn decrement(gauge: &AtomicUsize) -> u64 {
    let previous = gauge
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        })
        .unwrap_or(0);
    previous.saturating_sub(1) as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_labels() {
        assert_eq!(ActorType::Controller.as_str(), "controller");
        assert_eq!(ActorType::BillingTimer.as_str(), "billing_timer");
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(MailboxLevel::for_backlog(0), MailboxLevel::Normal);
        assert_eq!(MailboxLevel::for_backlog(99), MailboxLevel::Normal);
        assert_eq!(MailboxLevel::for_backlog(100), MailboxLevel::Elevated);
        assert_eq!(MailboxLevel::for_backlog(500), MailboxLevel::Elevated);
        assert_eq!(MailboxLevel::for_backlog(501), MailboxLevel::Critical);
    }

    #[test]
    fn test_monitor_tracks_backlog_and_peak() {
        let mut monitor = MailboxMonitor::new(ActorType::Controller, "relay-1");

        monitor.observe(3);
        monitor.observe(250);
        assert_eq!(monitor.level(), MailboxLevel::Elevated);

        monitor.observe(600);
        assert_eq!(monitor.level(), MailboxLevel::Critical);

        monitor.observe(0);
        assert_eq!(monitor.backlog(), 0);
        assert_eq!(monitor.peak_backlog(), 600);
        assert_eq!(monitor.level(), MailboxLevel::Normal);
        assert_eq!(monitor.messages_processed(), 4);
    }

    #[test]
    fn test_gauges() {
        let metrics = ActorMetrics::new();

        metrics.session_started();
        metrics.session_started();
        metrics.connection_opened();
        metrics.session_ended();
        assert_eq!(metrics.session_count(), 1);
        assert_eq!(metrics.connection_count(), 1);

        metrics.connection_closed();
        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_panics_are_counted() {
        let metrics = ActorMetrics::new();

        metrics.record_panic(ActorType::BillingTimer);
        metrics.record_panic(ActorType::Controller);

        assert_eq!(metrics.panic_count(), 2);
    }
}
