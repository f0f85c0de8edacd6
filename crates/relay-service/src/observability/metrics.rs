//! Metrics definitions for the Session Relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix for the Session Relay
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 2 values (controller, billing_timer)
//! - `event`: bounded by the inbound event names (~7 values)
//! - `error_type`: bounded by `RelayError::metric_label` (7 values)
//! - `reason`: bounded delivery failure reasons (backpressure, closed) and
//!   session end reasons (requested, shutdown)
//!
//! Session ids, user ids and connection ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Configures histogram
/// buckets for event handling latency (p99 < 100ms) and for session
/// durations (minutes to hours).
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Event handling latency - in-process work plus outbound enqueue
        .set_buckets_for_metric(
            Matcher::Prefix("relay_event_latency".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set event latency buckets: {e}"))?
        // Billed session length
        .set_buckets_for_metric(
            Matcher::Full("relay_session_duration_seconds".to_string()),
            &[
                60.0, 300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Session Metrics (Gauges)
// ============================================================================

/// Set the number of open signaling connections.
///
/// Metric: `relay_connections_active`
/// Labels: none
pub fn set_connections_active(count: u64) {
    // u64 to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Set the number of active (billed) sessions.
///
/// Metric: `relay_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_sessions_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `relay_actor_mailbox_depth`
/// Labels: `actor_type`
///
/// High values indicate the controller is falling behind.
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Event Metrics
// ============================================================================

/// Record handling of one inbound event.
///
/// Metrics: `relay_events_total` (counter), `relay_event_latency_seconds` (histogram)
/// Labels: `event`
pub fn record_event(event: &str, duration: Duration) {
    counter!("relay_events_total", "event" => event.to_string()).increment(1);
    histogram!("relay_event_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}

/// Record a relayed event and how many room members it reached.
///
/// Metric: `relay_messages_relayed_total`
/// Labels: `event`
///
/// A relay with zero recipients is counted separately as
/// `relay_messages_unrouted_total`: the sender was alone in the room.
pub fn record_relayed(event: &str, recipients: usize) {
    if recipients == 0 {
        counter!("relay_messages_unrouted_total", "event" => event.to_string()).increment(1);
    } else {
        counter!("relay_messages_relayed_total", "event" => event.to_string())
            .increment(recipients as u64);
    }
}

/// Record an outbound delivery failure.
///
/// Metric: `relay_delivery_failures_total`
/// Labels: `reason` (backpressure, closed)
pub fn record_delivery_failure(reason: &str) {
    counter!("relay_delivery_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Record an error reported back to a client.
///
/// Metric: `relay_errors_total`
/// Labels: `event`, `error_type`
pub fn record_error(event: &str, error_type: &str) {
    counter!("relay_errors_total",
        "event" => event.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ============================================================================
// Billing Metrics
// ============================================================================

/// Record an emitted billing tick.
///
/// Metric: `relay_billing_ticks_total`
/// Labels: none
pub fn record_billing_tick() {
    counter!("relay_billing_ticks_total").increment(1);
}

/// Record a billing tick discarded because its session had already ended.
///
/// Metric: `relay_billing_ticks_discarded_total`
/// Labels: none
pub fn record_billing_tick_discarded() {
    counter!("relay_billing_ticks_discarded_total").increment(1);
}

/// Record a session start.
///
/// Metric: `relay_sessions_started_total`
/// Labels: none
pub fn record_session_started() {
    counter!("relay_sessions_started_total").increment(1);
}

/// Record a session end.
///
/// Metric: `relay_sessions_ended_total`
/// Labels: `reason` (requested, shutdown)
pub fn record_session_ended(reason: &str) {
    counter!("relay_sessions_ended_total", "reason" => reason.to_string()).increment(1);
}

/// Record the total length of a session when it ends.
///
/// Metric: `relay_session_duration_seconds`
/// Labels: none
pub fn record_session_duration(duration: Duration) {
    histogram!("relay_session_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Additional Operational Metrics
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `relay_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("relay_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These execute the recording functions against whatever global recorder
    // is installed (a no-op one if none). Value assertions live in the
    // DebuggingRecorder test below.

    #[test]
    fn test_set_gauges() {
        set_connections_active(0);
        set_connections_active(10_000);
        set_sessions_active(0);
        set_sessions_active(250);
        set_actor_mailbox_depth("controller", 0);
        set_actor_mailbox_depth("controller", 501);
    }

    #[test]
    fn test_record_event_metrics() {
        record_event("offer", Duration::from_micros(300));
        record_event("start-session", Duration::from_millis(2));
        record_relayed("offer", 1);
        record_relayed("ice-candidate", 0);
        record_delivery_failure("backpressure");
        record_delivery_failure("closed");
        record_error("start-session", "conflict");
    }

    #[test]
    fn test_record_billing_metrics() {
        record_billing_tick();
        record_billing_tick_discarded();
        record_session_started();
        record_session_ended("requested");
        record_session_ended("shutdown");
        record_session_duration(Duration::from_secs(90));
        record_actor_panic("billing_timer");
    }

    #[test]
    fn test_prometheus_metrics_recorded() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        // Recorders are global state; this fails harmlessly if another test
        // already installed one, in which case the snapshot may be empty.
        if recorder.install().is_err() {
            return;
        }

        set_connections_active(2);
        set_sessions_active(1);
        set_actor_mailbox_depth("controller", 3);
        record_event("offer", Duration::from_millis(1));
        record_relayed("offer", 1);
        record_delivery_failure("closed");
        record_error("offer", "protocol");
        record_billing_tick();
        record_session_started();
        record_session_ended("requested");
        record_session_duration(Duration::from_secs(60));

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "relay_connections_active",
            "relay_sessions_active",
            "relay_actor_mailbox_depth",
            "relay_events_total",
            "relay_event_latency_seconds",
            "relay_messages_relayed_total",
            "relay_delivery_failures_total",
            "relay_errors_total",
            "relay_billing_ticks_total",
            "relay_sessions_started_total",
            "relay_sessions_ended_total",
            "relay_session_duration_seconds",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
    }
}
