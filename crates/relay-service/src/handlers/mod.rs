//! HTTP and WebSocket handlers for the Session Relay.

pub mod metrics;
pub mod sessions;
pub mod websocket;

pub use metrics::metrics_handler;
pub use sessions::{get_ice_servers, get_session, list_sessions};
pub use websocket::ws_handler;
