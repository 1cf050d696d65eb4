//! Boundary to the table-storage collaborator.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::upstream::SourceRecord;

/// Batch writer for one page of records.
///
/// Writes must be idempotent per `(table_id, record.id)`: a page may be
/// written again after a retry or a restart.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns the number of records written.
    async fn write_records(&self, table_id: &str, records: &[SourceRecord])
        -> Result<u64, SinkError>;
}
