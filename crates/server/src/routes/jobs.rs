// crates/server/src/routes/jobs.rs
//! API routes for bulk retrieval jobs.
//!
//! - POST /jobs: Start a job; returns 202 with its id
//! - GET /jobs: The caller's jobs, partitioned by status
//! - GET /jobs/{job_id}: Point-in-time snapshot
//! - POST /jobs/{job_id}/cancel: Request cancellation

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use bulkpull_types::{CancelResponse, Job, JobList, StartJobRequest, StartJobResponse};

use crate::auth::OwnerId;
use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/jobs: Create a pending job and hand it to the runner.
async fn start_job(
    State(state): State<Arc<AppState>>,
    owner: OwnerId,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let job_id = state.jobs.start(owner.as_str(), request).await?;
    Ok((StatusCode::ACCEPTED, Json(StartJobResponse { job_id })))
}

/// GET /api/jobs: List the caller's jobs.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    owner: OwnerId,
) -> ApiResult<Json<JobList>> {
    Ok(Json(state.jobs.list(owner.as_str()).await?))
}

/// GET /api/jobs/{job_id}: One job, if the caller owns it.
async fn get_job(
    State(state): State<Arc<AppState>>,
    owner: OwnerId,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.get(owner.as_str(), &job_id).await?))
}

/// POST /api/jobs/{job_id}/cancel: Acknowledge a cancel request.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    owner: OwnerId,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    Ok(Json(state.jobs.cancel(owner.as_str(), &job_id).await?))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(start_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
}
