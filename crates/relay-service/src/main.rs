//! Session Relay
//!
//! WebSocket signaling relay with metered session billing.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Initialize the relay service (spawns the session controller)
//! 4. Bind and serve HTTP (WebSocket, health, metrics, query API)
//! 5. Wait for shutdown signal
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready so no new traffic is routed here
//! 2. End every active session and cancel its billing timer
//! 3. Stop the HTTP server, waiting at most the shutdown timeout

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use relay_service::actors::ActorMetrics;
use relay_service::config::Config;
use relay_service::observability::{init_metrics_recorder, HealthState};
use relay_service::routes::{build_routes, AppState};
use relay_service::service::RelayService;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Relay");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        relay_id = %config.relay_id,
        bind_address = %config.bind_address,
        rate_per_minute = %config.rate_per_minute,
        ice_servers = config.ice_servers.len(),
        connection_buffer = config.connection_buffer,
        shutdown_timeout_seconds = config.shutdown_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let service = Arc::new(RelayService::init(&config, ActorMetrics::new()));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app = build_routes(
        Arc::new(AppState {
            service: Arc::clone(&service),
            health: Arc::clone(&health_state),
        }),
        prometheus_handle,
    );

    // Bind listener BEFORE marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        format!("Failed to bind HTTP server to {addr}: {e}")
    })?;
    info!(addr = %addr, "HTTP server bound successfully");

    let shutdown_token = CancellationToken::new();
    let server_token = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!("Session Relay running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so no new sessions are routed here
    health_state.set_not_ready();

    match service.shutdown(config.shutdown_timeout).await {
        Ok(summary) => info!(
            sessions_ended = summary.sessions_ended,
            timers_stopped = summary.timers_stopped,
            "Session controller stopped"
        ),
        Err(e) => warn!(error = %e, "Session controller shutdown error"),
    }

    // Open sockets keep graceful shutdown waiting, so bound it
    shutdown_token.cancel();
    let stopped = tokio::time::timeout(config.shutdown_timeout, server).await;
    if stopped.is_err() {
        warn!("HTTP server did not stop within the shutdown timeout");
    }

    info!("Session Relay shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
