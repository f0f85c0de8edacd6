//! HTTP routes for the Session Relay.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::observability::{health_router, HealthState};
use crate::service::RelayService;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
pub struct AppState {
    /// The relay itself.
    pub service: Arc<RelayService>,

    /// Liveness/readiness flags.
    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/ws` - WebSocket signaling endpoint
/// - `/health` - Liveness check
/// - `/ready` - Readiness check
/// - `/metrics` - Prometheus metrics endpoint
/// - `/api/v1/ice-servers` - ICE server list
/// - `/api/v1/sessions` - Active sessions
/// - `/api/v1/sessions/:id` - One active session
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let relay_routes = Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/api/v1/ice-servers", get(handlers::get_ice_servers))
        .route("/api/v1/sessions", get(handlers::list_sessions))
        .route("/api/v1/sessions/:id", get(handlers::get_session))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    relay_routes
        .merge(health_router(Arc::clone(&state.health)))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}
