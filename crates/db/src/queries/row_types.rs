// crates/db/src/queries/row_types.rs
// Internal row types and their conversion into domain types.

use chrono::{DateTime, Utc};
use sqlx::Row;

use bulkpull_types::{DataSourceHandle, Job, JobProgress, JobStatus, SearchQuery};

use super::jobs::StoredJob;
use crate::{DbError, DbResult};

/// Column list shared by every `SELECT` that yields a [`JobRow`].
pub(crate) const JOB_COLUMNS: &str = "id, owner_id, table_id, table_name, query, data_source, \
    status, current_page, total_pages, processed_records, total_estimated, percentage, \
    cancel_requested, error, created_at, started_at, completed_at";

#[derive(Debug)]
pub(crate) struct JobRow {
    id: String,
    owner_id: String,
    table_id: String,
    table_name: String,
    query: String,
    data_source: String,
    status: String,
    current_page: i64,
    total_pages: i64,
    processed_records: i64,
    total_estimated: i64,
    percentage: f64,
    cancel_requested: bool,
    error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            table_id: row.try_get("table_id")?,
            table_name: row.try_get("table_name")?,
            query: row.try_get("query")?,
            data_source: row.try_get("data_source")?,
            status: row.try_get("status")?,
            current_page: row.try_get("current_page")?,
            total_pages: row.try_get("total_pages")?,
            processed_records: row.try_get("processed_records")?,
            total_estimated: row.try_get("total_estimated")?,
            percentage: row.try_get("percentage")?,
            cancel_requested: row.try_get("cancel_requested")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl JobRow {
    pub(crate) fn into_stored(self) -> DbResult<StoredJob> {
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e| DbError::Corrupt(format!("job {}: {e}", self.id)))?;
        let query: SearchQuery = serde_json::from_str(&self.query)
            .map_err(|e| DbError::Corrupt(format!("job {} query: {e}", self.id)))?;

        let job = Job {
            id: self.id,
            status,
            progress: JobProgress {
                current_page: to_u32(self.current_page),
                total_pages: to_u32(self.total_pages),
                processed_records: to_u64(self.processed_records),
                total_estimated: to_u64(self.total_estimated),
                percentage: self.percentage,
            },
            created_at: from_millis(self.created_at),
            started_at: self.started_at.map(from_millis),
            completed_at: self.completed_at.map(from_millis),
            error: self.error,
        };

        Ok(StoredJob {
            job,
            owner_id: self.owner_id,
            table_id: self.table_id,
            table_name: self.table_name,
            query,
            source: DataSourceHandle::new(self.data_source),
            cancel_requested: self.cancel_requested,
        })
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn to_u32(v: i64) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}
