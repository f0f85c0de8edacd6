//! Time-based session billing.
//!
//! - [`rate`]: per-minute rate and cent-exact amounts
//! - [`clock`]: cancellable per-session recurring timers

pub mod clock;
pub mod rate;

pub use clock::{BillingClock, BillingTick, ReapedTimer, BILLING_INTERVAL};
pub use rate::{Amount, BillingRate, ParseRateError};
