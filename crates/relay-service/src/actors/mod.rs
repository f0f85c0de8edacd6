//! Actor model for the session lifecycle.
//!
//! ```text
//! SessionControllerActor (singleton per relay)
//!     |-- owns BillingClock
//!     |       `-- billing timer task (one per active session)
//!     `-- sole writer of SessionRegistry
//! ```
//!
//! Lifecycle requests and billing ticks share the controller mailbox, which
//! serializes every transition and tick across all sessions. Signaling relay
//! traffic does not pass through the controller.

pub mod controller;
pub mod messages;
pub mod metrics;

pub use controller::{ControllerDeps, SessionControllerActor, SessionControllerHandle};
pub use messages::{ControllerMessage, ControllerStatus, EndOutcome, EndReason, ShutdownSummary};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
