//! Session Relay Service Library
//!
//! A WebSocket signaling relay with metered session billing:
//!
//! - Participants join named rooms and exchange opaque WebRTC negotiation
//!   payloads (offer, answer, ICE candidate) with the other room members
//! - A reader and a client start a metered session; while it is active the
//!   relay emits a `billing-update` to the room every billing interval
//! - Ending a session stops its billing clock and notifies the other members
//!
//! # Architecture
//!
//! ```text
//! WebSocket transport (handlers::websocket)
//!     `-- RelayService
//!         |-- RoomRegistry (membership + fan-out, inline)
//!         |-- SessionRegistry (active sessions, read by queries)
//!         `-- SessionControllerActor (session lifecycle + billing ticks)
//!             `-- BillingClock (one timer task per active session)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Controller actor, messages and actor metrics
//! - [`billing`] - Billing rate arithmetic and per-session timers
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`signaling`] - Wire protocol, connections and rooms

pub mod actors;
pub mod billing;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod registry;
pub mod routes;
pub mod service;
pub mod signaling;
