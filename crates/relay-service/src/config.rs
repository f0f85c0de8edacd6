//! Session Relay configuration.
//!
//! Configuration is loaded from environment variables. Every variable is
//! optional; unparsable numeric values fall back to their defaults, while an
//! unparsable billing rate is rejected so the relay never bills at a guessed
//! rate.

use crate::billing::{BillingRate, BILLING_INTERVAL};
use crate::signaling::IceServer;

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default per-minute billing rate.
pub const DEFAULT_RATE_PER_MINUTE: &str = "2.00";

/// Default relay-assistance endpoint handed to participants.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default per-connection outbound queue capacity.
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

/// Default bound on draining billing timers at shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Default relay instance ID prefix.
pub const DEFAULT_RELAY_ID_PREFIX: &str = "relay";

/// Session Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this relay instance.
    pub relay_id: String,

    /// Per-minute billing rate (default: 2.00).
    pub rate_per_minute: BillingRate,

    /// ICE/STUN/TURN servers returned verbatim to participants.
    pub ice_servers: Vec<IceServer>,

    /// Outbound queue capacity per connection (default: 256).
    pub connection_buffer: usize,

    /// Bound on draining billing timers at shutdown (default: 10s).
    pub shutdown_timeout: Duration,

    /// Interval between billing ticks. Not read from the environment.
    pub billing_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `RELAY_RATE_PER_MINUTE` is not a
    /// valid decimal rate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `RELAY_RATE_PER_MINUTE` is not a
    /// valid decimal rate.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let rate_per_minute = vars
            .get("RELAY_RATE_PER_MINUTE")
            .map_or(DEFAULT_RATE_PER_MINUTE, String::as_str)
            .parse::<BillingRate>()
            .map_err(|e| ConfigError::InvalidValue(format!("RELAY_RATE_PER_MINUTE: {e}")))?;

        let ice_servers = vars
            .get("RELAY_ICE_SERVERS")
            .map(|list| parse_ice_servers(list))
            .filter(|servers| !servers.is_empty())
            .unwrap_or_else(|| {
                vec![IceServer {
                    urls: DEFAULT_ICE_SERVER.to_string(),
                }]
            });

        let connection_buffer = vars
            .get("RELAY_CONNECTION_BUFFER")
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(DEFAULT_CONNECTION_BUFFER);

        let shutdown_timeout_seconds = vars
            .get("RELAY_SHUTDOWN_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS);

        // Generate relay instance ID
        let relay_id = vars.get("RELAY_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RELAY_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            relay_id,
            rate_per_minute,
            ice_servers,
            connection_buffer,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
            billing_interval: BILLING_INTERVAL,
        })
    }
}

fn parse_ice_servers(list: &str) -> Vec<IceServer> {
    list.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| IceServer {
            urls: url.to_string(),
        })
        .collect()
}
