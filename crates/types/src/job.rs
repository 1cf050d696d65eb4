//! Job snapshot types and the job lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Unique identifier for a background job (`job_<hex>`).
pub type JobId = String;

/// Status of a background job.
///
/// `pending -> running -> {completed, failed, cancelled}`, plus
/// `pending -> cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Progress counters for one job run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub current_page: u32,
    pub total_pages: u32,
    #[ts(type = "number")]
    pub processed_records: u64,
    #[ts(type = "number")]
    pub total_estimated: u64,
    /// 0..=100 with one decimal.
    pub percentage: f64,
}

impl JobProgress {
    /// `min(100, round(processed / max(total, 1) * 100, 1 decimal))`
    pub fn percentage_of(processed: u64, total_estimated: u64) -> f64 {
        let ratio = processed as f64 / total_estimated.max(1) as f64;
        let rounded = (ratio * 1000.0).round() / 10.0;
        rounded.min(100.0)
    }

    /// Recompute `percentage` from the current counters.
    pub fn refresh_percentage(&mut self) {
        self.percentage = Self::percentage_of(self.processed_records, self.total_estimated);
    }
}

/// Point-in-time job snapshot, as served by `GET /api/jobs/{id}` and pushed
/// inside `job_*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(deserialize_with = "crate::ids::lenient_id")]
    pub id: JobId,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// A freshly created job: pending, zeroed progress.
    pub fn pending(id: impl Into<JobId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Pre-flight forecast of a job's size. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    #[ts(type = "number")]
    pub total_records: u64,
    pub total_pages: u32,
    /// Whole seconds.
    #[ts(type = "number")]
    pub estimated_duration: u64,
    pub exceeds_warning_threshold: bool,
}
