//! Observability for the Session Relay.
//!
//! # Privacy by Default
//!
//! Handlers use `#[instrument(skip_all)]` and record only allow-listed fields.
//! Relayed payloads (SDP offers, answers, ICE candidates) are never logged;
//! only their event name and recipient count are. Metric labels are bounded
//! (see [`metrics`]).
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_connections_active` | Gauge | none | Open signaling connections |
//! | `relay_sessions_active` | Gauge | none | Sessions with a running billing clock |
//! | `relay_actor_mailbox_depth` | Gauge | `actor_type` | Controller backpressure |
//! | `relay_events_total` | Counter | `event` | Inbound events handled |
//! | `relay_event_latency_seconds` | Histogram | `event` | Inbound event handling time |
//! | `relay_messages_relayed_total` | Counter | `event` | Deliveries to room members |
//! | `relay_messages_unrouted_total` | Counter | `event` | Relays with no other member present |
//! | `relay_delivery_failures_total` | Counter | `reason` | Full or closed outbound queues |
//! | `relay_errors_total` | Counter | `event`, `error_type` | `error` events sent to clients |
//! | `relay_billing_ticks_total` | Counter | none | `billing-update` broadcasts |
//! | `relay_billing_ticks_discarded_total` | Counter | none | Late ticks after session end |
//! | `relay_sessions_started_total` | Counter | none | Sessions moved to Active |
//! | `relay_sessions_ended_total` | Counter | `reason` | Sessions terminated |
//! | `relay_session_duration_seconds` | Histogram | none | Billed session length |
//! | `relay_actor_panics_total` | Counter | `actor_type` | Panicked actor tasks |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
