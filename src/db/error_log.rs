use sqlx::SqlitePool;

use super::{parse_timestamp, QueueError};
use crate::models::{Operation, SyncError};

/// Append-only log of failed remote applications.
///
/// Entries are only removed by [`SyncErrorLog::clear`]; nothing prunes it
/// automatically.
#[derive(Debug, Clone)]
pub struct SyncErrorLog {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SyncErrorRow {
    id: String,
    entity_type: String,
    entity_id: String,
    operation: String,
    error: String,
    occurred_at: String,
    retry_count: i64,
}

impl SyncErrorRow {
    fn decode(self) -> Result<SyncError, QueueError> {
        let corrupt = |reason: String| QueueError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let operation: Operation = self.operation.parse().map_err(corrupt)?;
        let occurred_at = parse_timestamp(&self.occurred_at).map_err(corrupt)?;

        Ok(SyncError {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            operation,
            error: self.error,
            occurred_at,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

impl SyncErrorLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, error: &SyncError) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO sync_errors (id, entity_type, entity_id, operation, error, occurred_at, retry_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&error.id)
        .bind(&error.entity_type)
        .bind(&error.entity_id)
        .bind(error.operation.as_str())
        .bind(&error.error)
        .bind(error.occurred_at.to_rfc3339())
        .bind(error.retry_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All recorded errors, oldest first.
    pub async fn list(&self) -> Result<Vec<SyncError>, QueueError> {
        let rows: Vec<SyncErrorRow> = sqlx::query_as(
            "SELECT id, entity_type, entity_id, operation, error, occurred_at, retry_count FROM sync_errors ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncErrorRow::decode).collect()
    }

    pub async fn count(&self) -> Result<usize, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_errors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn clear(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM sync_errors")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
