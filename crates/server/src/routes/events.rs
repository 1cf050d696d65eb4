// crates/server/src/routes/events.rs
//! Ingress for events produced by the upload and cell pipelines.
//!
//! Those collaborators run elsewhere; they post here and the event rides the
//! same push connections as job events. Job events are server-owned and
//! refused.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use bulkpull_types::{PublishResponse, ServerMessage};

use crate::auth::OwnerId;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/events: Fan an `upload_progress` or `cell_update` out to the
/// caller's live connections.
async fn publish_event(
    State(state): State<Arc<AppState>>,
    owner: OwnerId,
    Json(message): Json<ServerMessage>,
) -> ApiResult<Json<PublishResponse>> {
    match message {
        ServerMessage::UploadProgress(_) | ServerMessage::CellUpdate(_) => {}
        other => {
            return Err(ApiError::BadRequest(format!(
                "event type `{}` cannot be published here",
                other.kind()
            )))
        }
    }

    let delivered = state.notifier.publish(owner.as_str(), &message);
    tracing::debug!(owner_id = %owner.as_str(), kind = message.kind(), delivered, "event published");
    Ok(Json(PublishResponse { delivered }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", post(publish_event))
}
