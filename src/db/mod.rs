mod data_cache;
mod error;
mod error_log;
mod metadata;
mod queue_repo;
mod upload_repo;

pub use data_cache::{DataCache, DEFAULT_TTL};
pub use error::QueueError;
pub use error_log::SyncErrorLog;
pub use metadata::SyncMetadata;
pub use queue_repo::{CorruptItem, DueItems, QueueRepository};
pub use upload_repo::{DueUploads, UploadRepository};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Opens the offline queue database and runs its migrations.
pub async fn init_db(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = open_pool(path).await?;
    sqlx::migrate!("./migrations/queue").run(&pool).await?;
    Ok(pool)
}

/// Opens the response cache database and runs its migrations.
///
/// Kept apart from the queue so the proxy and the sync engine never
/// contend on the same file.
pub async fn init_cache_db(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = open_pool(path).await?;
    sqlx::migrate!("./migrations/cache").run(&pool).await?;
    Ok(pool)
}

async fn open_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Wipes queued mutations, pending uploads and cached entity data.
///
/// The error log and dead letters are left alone; they have their own
/// explicit clear actions.
pub async fn clear_all(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM queue_items")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM pending_uploads")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM cached_data")
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("offline.db");

        let pool = init_db(&db_path).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"queue_items"));
        assert!(table_names.contains(&"dead_letters"));
        assert!(table_names.contains(&"sync_errors"));
        assert!(table_names.contains(&"pending_uploads"));
        assert!(table_names.contains(&"cached_data"));
        assert!(table_names.contains(&"sync_metadata"));
    }

    #[tokio::test]
    async fn test_init_cache_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let pool = init_cache_db(&temp_dir.path().join("cache.db"))
            .await
            .unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('caches', 'cache_entries')",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables.len(), 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("offline.db");

        {
            let pool = init_db(&db_path).await.unwrap();
            sqlx::query("INSERT INTO sync_metadata (key, value) VALUES ('k', 'v')")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let pool = init_db(&db_path).await.unwrap();
        let (value,): (String,) = sqlx::query_as("SELECT value FROM sync_metadata WHERE key = 'k'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "v");
    }

    #[tokio::test]
    async fn test_clear_all_keeps_errors_and_dead_letters() {
        use crate::models::{EntityType, NewQueueItem, Operation, PendingUpload, SyncError};
        use serde_json::json;

        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("offline.db")).await.unwrap();
        let queue = QueueRepository::new(pool.clone());
        let uploads = UploadRepository::new(pool.clone());
        let cache = DataCache::new(pool.clone());
        let errors = SyncErrorLog::new(pool.clone());

        queue
            .enqueue(NewQueueItem::new(EntityType::Part, Operation::Create, json!({})))
            .await
            .unwrap();
        let doomed = queue
            .enqueue(NewQueueItem::new(EntityType::Part, Operation::Delete, json!({"id": "p-1"})))
            .await
            .unwrap();
        queue.move_to_dead_letter(&doomed, "gone").await.unwrap();
        uploads
            .save(&PendingUpload::new(vec![1], vec![], EntityType::Part, "p-1"))
            .await
            .unwrap();
        cache
            .put("part", "p-1", &json!({"name": "Gasket"}), DEFAULT_TTL)
            .await
            .unwrap();
        errors
            .record(&SyncError::new("part", "p-1", Operation::Delete, "gone", 3))
            .await
            .unwrap();

        clear_all(&pool).await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 0);
        assert_eq!(uploads.count_unfinished().await.unwrap(), 0);
        assert!(cache.get("part", "p-1").await.unwrap().is_none());
        assert_eq!(queue.list_dead_letters().await.unwrap().len(), 1);
        assert_eq!(errors.count().await.unwrap(), 1);
    }

    #[test]
    fn test_parse_timestamp() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(&now.to_rfc3339()).unwrap(), now);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
