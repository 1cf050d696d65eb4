//! Table-storage collaborator: idempotent row upserts keyed by source record id.

use async_trait::async_trait;
use chrono::Utc;

use bulkpull_core::{RecordSink, SinkError, SourceRecord};

use crate::{Database, DbResult};

impl Database {
    pub async fn table_exists(&self, table_id: &str) -> DbResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM data_tables WHERE id = ?")
            .bind(table_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    pub async fn count_rows(&self, table_id: &str) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM table_rows WHERE table_id = ?")
            .bind(table_id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Source ids stored in a table, in id order.
    pub async fn row_ids(&self, table_id: &str) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT source_id FROM table_rows WHERE table_id = ? ORDER BY source_id",
        )
        .bind(table_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl RecordSink for Database {
    async fn write_records(
        &self,
        table_id: &str,
        records: &[SourceRecord],
    ) -> Result<u64, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }
        if !self
            .table_exists(table_id)
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?
        {
            return Err(SinkError::TableNotFound(table_id.to_string()));
        }

        let written_at = Utc::now().timestamp_millis();
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        for record in records {
            let data = serde_json::to_string(&record.fields)
                .map_err(|e| SinkError::Write(e.to_string()))?;
            sqlx::query(
                "INSERT INTO table_rows (table_id, source_id, data, written_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(table_id, source_id) DO UPDATE SET \
                 data = excluded.data, written_at = excluded.written_at",
            )
            .bind(table_id)
            .bind(&record.id)
            .bind(&data)
            .bind(written_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;

        tracing::debug!(table_id, rows = records.len(), "page written");
        Ok(records.len() as u64)
    }
}
