// crates/server/src/routes/health.rs
//! GET /api/health: liveness plus job-store reachability and gate load.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the job store does not answer.
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub database: bool,
    /// Jobs with a live worker, including those still waiting for a slot.
    pub active_jobs: usize,
    pub running_capacity: usize,
    pub free_slots: usize,
    pub push_connections: usize,
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health check: job store unreachable");
            false
        }
    };
    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        database,
        active_jobs: state.runner.active_count(),
        running_capacity: state.runner.capacity(),
        free_slots: state.runner.free_slots(),
        push_connections: state.notifier.connection_count(),
    };
    (code, Json(body))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
