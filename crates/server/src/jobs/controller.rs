// crates/server/src/jobs/controller.rs
//! Control-plane operations on jobs, scoped to the calling owner.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use bulkpull_core::validate::{validate_query, validate_table_name};
use bulkpull_core::{ProviderRegistry, ValidationError};
use bulkpull_db::{Database, DbError, NewJob};
use bulkpull_types::{CancelResponse, Job, JobId, JobList, StartJobRequest};

use super::runner::JobRunner;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Missing, or owned by someone else.
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Clone)]
pub struct JobController {
    db: Database,
    runner: Arc<JobRunner>,
    registry: Arc<ProviderRegistry>,
}

impl JobController {
    pub fn new(db: Database, runner: Arc<JobRunner>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            db,
            runner,
            registry,
        }
    }

    /// Validate, persist a `pending` job with its own table, and hand it to
    /// the runner. Returns without waiting for any page.
    pub async fn start(&self, owner_id: &str, request: StartJobRequest) -> Result<JobId, ControlError> {
        validate_table_name(&request.table_name)?;
        validate_query(&request.query)?;
        if !self.registry.contains(&request.data_source_handle) {
            return Err(ValidationError::UnknownSource(request.data_source_handle.0).into());
        }

        let new = NewJob {
            id: format!("job_{}", Uuid::new_v4().simple()),
            owner_id: owner_id.to_string(),
            table_id: format!("tbl_{}", Uuid::new_v4().simple()),
            table_name: request.table_name,
            query: request.query,
            source: request.data_source_handle,
            created_at: Utc::now(),
        };
        let stored = self.db.insert_job(&new).await?;
        info!(
            job_id = %new.id,
            owner_id = %owner_id,
            table_id = %new.table_id,
            source = %new.source,
            "job created"
        );

        self.runner.enqueue(stored);
        Ok(new.id)
    }

    /// Ask a live job to stop. The stop itself happens at the worker's next
    /// check point; a job that is already terminal is left alone.
    pub async fn cancel(&self, owner_id: &str, job_id: &str) -> Result<CancelResponse, ControlError> {
        let stored = self
            .db
            .request_cancel(owner_id, job_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(job_id.to_string()))?;

        let status = stored.job.status;
        if status.is_terminal() {
            debug!(job_id = %job_id, %status, "cancel on terminal job ignored");
            return Ok(CancelResponse {
                job_id: stored.job.id,
                status,
                cancel_requested: false,
            });
        }

        if !self.runner.cancel(job_id) {
            debug!(job_id = %job_id, "no live worker, cancel applies on next start");
        }
        info!(job_id = %job_id, owner_id = %owner_id, "cancel requested");
        Ok(CancelResponse {
            job_id: stored.job.id,
            status,
            cancel_requested: true,
        })
    }

    pub async fn get(&self, owner_id: &str, job_id: &str) -> Result<Job, ControlError> {
        self.db
            .get_owned_job(owner_id, job_id)
            .await?
            .map(|stored| stored.job)
            .ok_or_else(|| ControlError::NotFound(job_id.to_string()))
    }

    pub async fn list(&self, owner_id: &str) -> Result<JobList, ControlError> {
        Ok(JobList::from_jobs(self.db.list_jobs(owner_id).await?))
    }
}
