//! Signaling Relay.
//!
//! - [`protocol`]: JSON envelope codec for inbound and outbound events
//! - [`connection`]: per-participant outbound queue
//! - [`rooms`]: room membership and fan-out to co-members
//!
//! The relay never interprets negotiation payloads and never buffers events
//! for absent recipients: a relay into a room with no other member is dropped.

pub mod connection;
pub mod protocol;
pub mod rooms;

pub use connection::{Connection, ConnectionHandle};
pub use protocol::{ClientEvent, IceServer, ServerEvent, Signal, SignalKind};
pub use rooms::RoomRegistry;
