use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{parse_timestamp, QueueError};

const LAST_SYNC_AT: &str = "last_sync_at";

/// Small key/value table for sync bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncMetadata {
    pool: SqlitePool,
}

impl SyncMetadata {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(LAST_SYNC_AT)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((value,)) => parse_timestamp(&value)
                .map(Some)
                .map_err(|reason| QueueError::Corrupt {
                    id: LAST_SYNC_AT.to_string(),
                    reason,
                }),
            None => Ok(None),
        }
    }

    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO sync_metadata (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SYNC_AT)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
