//! HTTP and WebSocket route handlers for the bulkpull server.

pub mod estimate;
pub mod events;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/estimate - Pre-flight size and duration forecast
/// - POST /api/jobs - Start a bulk retrieval job (202)
/// - GET  /api/jobs - The caller's jobs, partitioned by status
/// - GET  /api/jobs/{job_id} - Job snapshot (polling fallback)
/// - POST /api/jobs/{job_id}/cancel - Request cancellation
/// - POST /api/events - Publish an upload/cell event to the caller's connections
/// - GET  /ws - Push channel
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", estimate::router())
        .nest("/api", jobs::router())
        .nest("/api", events::router())
        .merge(ws::router())
        .merge(metrics::router())
        .with_state(state)
}
