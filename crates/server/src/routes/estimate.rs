// crates/server/src/routes/estimate.rs
//! Pre-flight estimate endpoint. Never creates a job.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use bulkpull_types::{Estimate, EstimateRequest};

use crate::auth::OwnerId;
use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/estimate - Ask the upstream for page 1 and forecast the run.
pub async fn estimate(
    State(state): State<Arc<AppState>>,
    owner: OwnerId,
    Json(request): Json<EstimateRequest>,
) -> ApiResult<Json<Estimate>> {
    let estimate = state
        .estimates
        .estimate(&request.query, &request.data_source_handle)
        .await?;
    tracing::debug!(
        owner_id = %owner.as_str(),
        source = %request.data_source_handle,
        total_records = estimate.total_records,
        "estimate served"
    );
    Ok(Json(estimate))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/estimate", post(estimate))
}
