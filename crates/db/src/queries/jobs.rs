//! Job store: creation, owner-scoped reads and state-machine guarded updates.
//!
//! Every transition is a single `UPDATE ... WHERE status IN (..)`, so a
//! terminal row can never be rewritten no matter who calls.

use chrono::{DateTime, Utc};

use bulkpull_types::{DataSourceHandle, Job, JobId, JobProgress, JobStatus, SearchQuery};

use super::row_types::{to_millis, JobRow, JOB_COLUMNS};
use crate::{Database, DbError, DbResult};

/// Input for [`Database::insert_job`]. Ids are minted by the caller.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub owner_id: String,
    pub table_id: String,
    pub table_name: String,
    pub query: SearchQuery,
    pub source: DataSourceHandle,
    pub created_at: DateTime<Utc>,
}

/// A job row with the server-side fields the wire snapshot omits.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub job: Job,
    pub owner_id: String,
    pub table_id: String,
    pub table_name: String,
    pub query: SearchQuery,
    pub source: DataSourceHandle,
    pub cancel_requested: bool,
}

impl Database {
    /// Create the job's table and the `pending` job row in one transaction.
    pub async fn insert_job(&self, new: &NewJob) -> DbResult<StoredJob> {
        let query_json =
            serde_json::to_string(&new.query).map_err(|e| DbError::Corrupt(e.to_string()))?;
        let created_at = to_millis(new.created_at);

        let mut tx = self.pool().begin().await?;
        sqlx::query("INSERT INTO data_tables (id, owner_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&new.table_id)
            .bind(&new.owner_id)
            .bind(new.table_name.trim())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO jobs (id, owner_id, table_id, table_name, query, data_source, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&new.id)
        .bind(&new.owner_id)
        .bind(&new.table_id)
        .bind(new.table_name.trim())
        .bind(&query_json)
        .bind(new.source.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.require_job(&new.id).await
    }

    pub async fn get_job(&self, id: &str) -> DbResult<Option<StoredJob>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(JobRow::into_stored).transpose()
    }

    /// Like [`get_job`](Self::get_job), but a job owned by someone else is `None`.
    pub async fn get_owned_job(&self, owner_id: &str, id: &str) -> DbResult<Option<StoredJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(JobRow::into_stored).transpose()
    }

    /// All of one owner's jobs, newest first.
    pub async fn list_jobs(&self, owner_id: &str) -> DbResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|row| row.into_stored().map(|stored| stored.job))
            .collect()
    }

    /// Jobs that were pending or running when the process last stopped, oldest first.
    pub async fn resumable_jobs(&self) -> DbResult<Vec<StoredJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ('pending', 'running') \
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(JobRow::into_stored).collect()
    }

    /// `pending -> running`.
    pub async fn mark_running(&self, id: &str, at: DateTime<Utc>) -> DbResult<StoredJob> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(to_millis(at))
        .bind(id)
        .execute(self.pool())
        .await?;
        self.after_transition(id, JobStatus::Running, result.rows_affected())
            .await
    }

    /// Persist counters of a running job. No-op once the job is terminal.
    pub async fn record_progress(&self, id: &str, progress: &JobProgress) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET current_page = ?, total_pages = ?, processed_records = ?, \
             total_estimated = ?, percentage = ? WHERE id = ? AND status = 'running'",
        )
        .bind(i64::from(progress.current_page))
        .bind(i64::from(progress.total_pages))
        .bind(progress.processed_records as i64)
        .bind(progress.total_estimated as i64)
        .bind(progress.percentage)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `running -> completed` with the final counters.
    pub async fn mark_completed(
        &self,
        id: &str,
        progress: &JobProgress,
        at: DateTime<Utc>,
    ) -> DbResult<StoredJob> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', current_page = ?, total_pages = ?, \
             processed_records = ?, total_estimated = ?, percentage = ?, completed_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(i64::from(progress.current_page))
        .bind(i64::from(progress.total_pages))
        .bind(progress.processed_records as i64)
        .bind(progress.total_estimated as i64)
        .bind(progress.percentage)
        .bind(to_millis(at))
        .bind(id)
        .execute(self.pool())
        .await?;
        self.after_transition(id, JobStatus::Completed, result.rows_affected())
            .await
    }

    /// `running -> failed`, recording the error message.
    pub async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> DbResult<StoredJob> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, completed_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(to_millis(at))
        .bind(id)
        .execute(self.pool())
        .await?;
        self.after_transition(id, JobStatus::Failed, result.rows_affected())
            .await
    }

    /// `pending|running -> cancelled`. Counters are left as they are.
    pub async fn mark_cancelled(&self, id: &str, at: DateTime<Utc>) -> DbResult<StoredJob> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = ? \
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(to_millis(at))
        .bind(id)
        .execute(self.pool())
        .await?;
        self.after_transition(id, JobStatus::Cancelled, result.rows_affected())
            .await
    }

    /// Durably flag a cancel request on a live job owned by `owner_id`.
    ///
    /// Returns the job as stored afterwards; `None` when it does not exist or
    /// belongs to someone else. Terminal jobs are returned unchanged.
    pub async fn request_cancel(&self, owner_id: &str, id: &str) -> DbResult<Option<StoredJob>> {
        sqlx::query(
            "UPDATE jobs SET cancel_requested = 1 \
             WHERE id = ? AND owner_id = ? AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(owner_id)
        .execute(self.pool())
        .await?;
        self.get_owned_job(owner_id, id).await
    }

    async fn require_job(&self, id: &str) -> DbResult<StoredJob> {
        self.get_job(id)
            .await?
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    async fn after_transition(
        &self,
        id: &str,
        to: JobStatus,
        rows_affected: u64,
    ) -> DbResult<StoredJob> {
        let stored = self.require_job(id).await?;
        if rows_affected == 0 {
            return Err(DbError::InvalidTransition {
                job_id: id.to_string(),
                to,
            });
        }
        Ok(stored)
    }
}
