//! Control-plane request and response bodies.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::job::{Job, JobId, JobStatus};
use crate::query::{DataSourceHandle, SearchQuery};

/// `POST /api/estimate`
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    pub query: SearchQuery,
    pub data_source_handle: DataSourceHandle,
}

/// `POST /api/jobs`
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub table_name: String,
    pub query: SearchQuery,
    pub data_source_handle: DataSourceHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    #[serde(deserialize_with = "crate::ids::lenient_id")]
    pub job_id: JobId,
}

/// Acknowledgement for `POST /api/jobs/{id}/cancel`.
///
/// `cancel_requested` is false when the job had already reached a terminal
/// state and the request was a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub cancel_requested: bool,
}

/// Counts per partition of [`JobList`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Dashboard view of one owner's jobs, newest first in every partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct JobList {
    pub all: Vec<Job>,
    pub running: Vec<Job>,
    pub completed: Vec<Job>,
    pub failed: Vec<Job>,
    pub cancelled: Vec<Job>,
    pub summary: JobSummary,
}

impl JobList {
    /// Partition jobs by status, preserving input order.
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut list = JobList::default();
        for job in &jobs {
            match job.status {
                JobStatus::Pending => list.summary.pending += 1,
                JobStatus::Running => list.running.push(job.clone()),
                JobStatus::Completed => list.completed.push(job.clone()),
                JobStatus::Failed => list.failed.push(job.clone()),
                JobStatus::Cancelled => list.cancelled.push(job.clone()),
            }
        }
        list.summary.total = jobs.len();
        list.summary.running = list.running.len();
        list.summary.completed = list.completed.len();
        list.summary.failed = list.failed.len();
        list.summary.cancelled = list.cancelled.len();
        list.all = jobs;
        list
    }
}

/// Result of pushing a collaborator event through the hub.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub delivered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(id: &str, status: JobStatus) -> Job {
        let mut j = Job::pending(id, Utc::now());
        j.status = status;
        j
    }

    #[test]
    fn test_job_list_partitions_and_counts() {
        let list = JobList::from_jobs(vec![
            job("a", JobStatus::Running),
            job("b", JobStatus::Completed),
            job("c", JobStatus::Completed),
            job("d", JobStatus::Failed),
            job("e", JobStatus::Pending),
            job("f", JobStatus::Cancelled),
        ]);

        assert_eq!(list.all.len(), 6);
        assert_eq!(list.running.len(), 1);
        assert_eq!(list.completed[0].id, "b");
        assert_eq!(list.completed[1].id, "c");
        assert_eq!(
            list.summary,
            JobSummary {
                total: 6,
                pending: 1,
                running: 1,
                completed: 2,
                failed: 1,
                cancelled: 1,
            }
        );
    }

    #[test]
    fn test_start_request_field_names() {
        let raw = r#"{"tableName":"Leads","query":{"terms":"cto"},"dataSourceHandle":"people"}"#;
        let req: StartJobRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.table_name, "Leads");
        assert_eq!(req.data_source_handle.as_str(), "people");
        assert_eq!(req.query.terms.as_deref(), Some("cto"));
    }
}
