//! Push-channel frames.
//!
//! Client to server frames are internally tagged (`{"type":"auth","userId":..}`).
//! Server to client frames use the `{type, data}` envelope, one variant per
//! event kind, so consumers dispatch with a single exhaustive `match`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::job::{Job, JobStatus};

/// Frames sent by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first frame on a new connection.
    Auth {
        #[serde(rename = "userId", deserialize_with = "crate::ids::lenient_id")]
        user_id: String,
    },
    /// Application-level heartbeat; answered with [`ServerMessage::Pong`].
    Ping,
}

/// Progress of a CSV upload handled by the upload collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    #[serde(deserialize_with = "crate::ids::lenient_id")]
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[ts(type = "number")]
    pub processed_rows: u64,
    #[ts(type = "number")]
    pub total_rows: u64,
    pub status: String,
}

/// A single cell value changed (webhook ingestion, enrichment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct CellUpdate {
    pub table_id: String,
    pub row_id: String,
    pub column_id: String,
    pub value: serde_json::Value,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess,
    Error { message: String },
    Pong,
    JobProgress(Job),
    JobComplete(Job),
    JobFailed(Job),
    JobCancelled(Job),
    UploadProgress(UploadProgress),
    CellUpdate(CellUpdate),
}

impl ServerMessage {
    /// The event that announces `job` in its current status.
    pub fn for_job(job: Job) -> Self {
        match job.status {
            JobStatus::Pending | JobStatus::Running => ServerMessage::JobProgress(job),
            JobStatus::Completed => ServerMessage::JobComplete(job),
            JobStatus::Failed => ServerMessage::JobFailed(job),
            JobStatus::Cancelled => ServerMessage::JobCancelled(job),
        }
    }

    /// Wire name of the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AuthSuccess => "auth_success",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong => "pong",
            ServerMessage::JobProgress(_) => "job_progress",
            ServerMessage::JobComplete(_) => "job_complete",
            ServerMessage::JobFailed(_) => "job_failed",
            ServerMessage::JobCancelled(_) => "job_cancelled",
            ServerMessage::UploadProgress(_) => "upload_progress",
            ServerMessage::CellUpdate(_) => "cell_update",
        }
    }

    /// Job snapshot carried by `job_*` events.
    pub fn job(&self) -> Option<&Job> {
        match self {
            ServerMessage::JobProgress(job)
            | ServerMessage::JobComplete(job)
            | ServerMessage::JobFailed(job)
            | ServerMessage::JobCancelled(job) => Some(job),
            ServerMessage::AuthSuccess
            | ServerMessage::Error { .. }
            | ServerMessage::Pong
            | ServerMessage::UploadProgress(_)
            | ServerMessage::CellUpdate(_) => None,
        }
    }

    pub fn into_job(self) -> Option<Job> {
        match self {
            ServerMessage::JobProgress(job)
            | ServerMessage::JobComplete(job)
            | ServerMessage::JobFailed(job)
            | ServerMessage::JobCancelled(job) => Some(job),
            _ => None,
        }
    }
}
