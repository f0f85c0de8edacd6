//! Liveness and readiness endpoints.
//!
//! - `GET /health` - answers `OK` while the process runs
//! - `GET /ready` - 200 only while the relay is serving, 503 while it is
//!   starting or draining; the body names the phase
//!
//! The relay moves Starting -> Serving -> Draining exactly once. Draining is
//! entered as soon as shutdown begins so load balancers stop routing new
//! signaling connections before sessions are ended.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle phase reported by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    Starting,
    Serving,
    Draining,
}

impl RelayPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => RelayPhase::Serving,
            2 => RelayPhase::Draining,
            _ => RelayPhase::Starting,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            RelayPhase::Starting => 0,
            RelayPhase::Serving => 1,
            RelayPhase::Draining => 2,
        }
    }
}

/// Shared lifecycle phase of the relay.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    /// New state in the `Starting` phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting -> Serving. Has no effect once draining.
    pub fn set_ready(&self) {
        let _ = self.phase.compare_exchange(
            RelayPhase::Starting.as_u8(),
            RelayPhase::Serving.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Enter `Draining`; the relay never reports ready again.
    pub fn set_not_ready(&self) {
        self.phase
            .store(RelayPhase::Draining.as_u8(), Ordering::SeqCst);
    }

    #[must_use]
    pub fn phase(&self) -> RelayPhase {
        RelayPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == RelayPhase::Serving
    }
}

/// Body of a `/ready` response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: RelayPhase,
}

/// Router serving `/health` and `/ready` over `health_state`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// Liveness never checks the controller: a hung process is what it detects.
async fn liveness_handler() -> &'static str {
    "OK"
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let phase = state.phase();
    let status = if phase == RelayPhase::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { status: phase }))
}
