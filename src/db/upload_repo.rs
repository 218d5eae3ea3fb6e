use sqlx::SqlitePool;

use super::{parse_timestamp, CorruptItem, QueueError};
use crate::models::{EntityType, PendingUpload, UploadStatus};

/// Photos captured offline and not yet uploaded.
#[derive(Debug, Clone)]
pub struct UploadRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: String,
    entity_type: String,
    entity_id: String,
    filename: String,
    mime_type: String,
    file: Vec<u8>,
    compressed_file: Vec<u8>,
    status: String,
    retry_count: i64,
    error: Option<String>,
    created_at: String,
}

impl UploadRow {
    fn decode(self) -> Result<PendingUpload, QueueError> {
        let corrupt = |reason: String| QueueError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let entity_type: EntityType = self.entity_type.parse().map_err(corrupt)?;
        let status: UploadStatus = self.status.parse().map_err(corrupt)?;
        let created_at = parse_timestamp(&self.created_at).map_err(corrupt)?;

        Ok(PendingUpload {
            id: self.id,
            entity_type,
            entity_id: self.entity_id,
            filename: self.filename,
            mime_type: self.mime_type,
            file: self.file,
            compressed_file: self.compressed_file,
            status,
            retry_count: self.retry_count.max(0) as u32,
            error: self.error,
            created_at,
        })
    }
}

/// Uploads eligible for another attempt.
#[derive(Debug, Default)]
pub struct DueUploads {
    /// Pending, interrupted and retryable failed uploads, in capture order.
    pub ready: Vec<PendingUpload>,
    pub corrupt: Vec<CorruptItem>,
}

const SELECT_UPLOADS: &str = "SELECT id, entity_type, entity_id, filename, mime_type, file, compressed_file, status, retry_count, error, created_at FROM pending_uploads";

impl UploadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces an upload.
    pub async fn save(&self, upload: &PendingUpload) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO pending_uploads (id, entity_type, entity_id, filename, mime_type, file, compressed_file, status, retry_count, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                entity_id = excluded.entity_id,
                filename = excluded.filename,
                mime_type = excluded.mime_type,
                file = excluded.file,
                compressed_file = excluded.compressed_file,
                status = excluded.status,
                retry_count = excluded.retry_count,
                error = excluded.error
            "#,
        )
        .bind(&upload.id)
        .bind(upload.entity_type.as_str())
        .bind(&upload.entity_id)
        .bind(&upload.filename)
        .bind(&upload.mime_type)
        .bind(&upload.file)
        .bind(&upload.compressed_file)
        .bind(upload.status.as_str())
        .bind(upload.retry_count as i64)
        .bind(&upload.error)
        .bind(upload.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingUpload>, QueueError> {
        let row: Option<UploadRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_UPLOADS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UploadRow::decode).transpose()
    }

    pub async fn list_by_status(
        &self,
        status: UploadStatus,
    ) -> Result<Vec<PendingUpload>, QueueError> {
        let rows: Vec<UploadRow> =
            sqlx::query_as(&format!("{} WHERE status = ? ORDER BY seq", SELECT_UPLOADS))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(UploadRow::decode).collect()
    }

    /// Loads every upload a sync run should attempt.
    ///
    /// Rows left `uploading` by an interrupted run are included. Failed rows
    /// are included until their retry count reaches `max_retries`. Rows that
    /// fail to decode are returned separately instead of failing the scan.
    pub async fn load_due(&self, max_retries: u32) -> Result<DueUploads, QueueError> {
        let rows: Vec<UploadRow> = sqlx::query_as(&format!(
            "{} WHERE status NOT IN ('done', 'failed') OR (status = 'failed' AND retry_count < ?) ORDER BY seq",
            SELECT_UPLOADS
        ))
        .bind(max_retries as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut due = DueUploads::default();
        for row in rows {
            match row.decode() {
                Ok(upload) => due.ready.push(upload),
                Err(QueueError::Corrupt { id, reason }) => {
                    due.corrupt.push(CorruptItem { id, reason })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(due)
    }

    /// Parks an unreadable upload as failed with its retry budget spent.
    pub async fn mark_unreadable(
        &self,
        id: &str,
        error: &str,
        retry_count: u32,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE pending_uploads SET status = 'failed', error = ?, retry_count = ? WHERE id = ?",
        )
        .bind(error)
        .bind(retry_count as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingUpload>, QueueError> {
        self.list_by_status(UploadStatus::Pending).await
    }

    pub async fn list_failed(&self) -> Result<Vec<PendingUpload>, QueueError> {
        self.list_by_status(UploadStatus::Failed).await
    }

    pub async fn count_unfinished(&self) -> Result<usize, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pending_uploads WHERE status != 'done'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as usize)
    }

    /// Sets an upload's status. Moving to `failed` bumps the retry count.
    pub async fn update_status(
        &self,
        id: &str,
        status: UploadStatus,
        error: Option<&str>,
    ) -> Result<bool, QueueError> {
        let bump = i64::from(status == UploadStatus::Failed);
        let result = sqlx::query(
            r#"
            UPDATE pending_uploads
            SET status = ?, error = COALESCE(?, error), retry_count = retry_count + ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(bump)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM pending_uploads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
