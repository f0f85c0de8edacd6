//! # Relay Test Utilities
//!
//! Shared test utilities for the Session Relay.
//!
//! This crate provides:
//! - Server test harness (`TestRelayServer` for E2E tests)
//! - Signaling client (`TestSignalingClient` speaking the JSON event protocol)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestRelayServer::spawn().await?;
//!     let mut client = TestSignalingClient::connect(&server.ws_url()).await?;
//!
//!     client.join("room-1", "user-1", "client").await?;
//!     client.expect_no_event().await;
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use server_harness::*;
pub use ws_client::*;
