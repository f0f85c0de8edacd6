//! Common types shared across the session relay crates.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
