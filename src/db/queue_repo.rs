use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{parse_timestamp, QueueError};
use crate::models::{DeadLetter, EntityType, NewQueueItem, Operation, QueueItem};

/// Append-only store of pending offline mutations.
///
/// Items are replayed in `seq` order; ids are UUIDs assigned on enqueue.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    entity_type: String,
    operation: String,
    payload: String,
    base: Option<String>,
    created_at: String,
    retry_count: i64,
    next_attempt_at: Option<String>,
}

impl QueueRow {
    fn decode(self) -> Result<QueueItem, CorruptItem> {
        let id = self.id;
        let corrupt = |reason: String| CorruptItem {
            id: id.clone(),
            reason,
        };

        let entity_type: EntityType = self.entity_type.parse().map_err(corrupt)?;
        let operation: Operation = self.operation.parse().map_err(corrupt)?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| corrupt(format!("invalid payload: {}", e)))?;
        let base = match self.base {
            Some(raw) => Some(
                serde_json::from_str(&raw).map_err(|e| corrupt(format!("invalid base: {}", e)))?,
            ),
            None => None,
        };
        let created_at = parse_timestamp(&self.created_at).map_err(corrupt)?;
        let next_attempt_at = match self.next_attempt_at {
            Some(raw) => Some(parse_timestamp(&raw).map_err(corrupt)?),
            None => None,
        };

        Ok(QueueItem {
            id: id.clone(),
            entity_type,
            operation,
            payload,
            base,
            created_at,
            retry_count: self.retry_count.max(0) as u32,
            next_attempt_at,
        })
    }
}

/// A stored row that can no longer be turned into a [`QueueItem`].
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptItem {
    pub id: String,
    pub reason: String,
}

/// Result of scanning the queue for work.
#[derive(Debug, Default)]
pub struct DueItems {
    /// Items whose backoff has elapsed, in enqueue order.
    pub ready: Vec<QueueItem>,
    /// Items still waiting for their next attempt.
    pub waiting: usize,
    pub corrupt: Vec<CorruptItem>,
}

const SELECT_ITEMS: &str = "SELECT id, entity_type, operation, payload, base, created_at, retry_count, next_attempt_at FROM queue_items";

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Appends a mutation and returns its generated id.
    pub async fn enqueue(&self, new_item: NewQueueItem) -> Result<String, QueueError> {
        let item = new_item.into_item();
        let payload = serde_json::to_string(&item.payload)?;
        let base = item.base.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO queue_items (id, entity_type, operation, payload, base, created_at, retry_count)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&item.id)
        .bind(item.entity_type.as_str())
        .bind(item.operation.as_str())
        .bind(&payload)
        .bind(&base)
        .bind(item.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Queued {}", item);
        Ok(item.id)
    }

    /// Removes items that were applied remotely.
    pub async fn dequeue_succeeded(&self, ids: &[String]) -> Result<u64, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM queue_items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }

    /// All pending items in enqueue order.
    ///
    /// Fails if any stored row is unreadable; the sync engine uses
    /// [`QueueRepository::load_due`] instead so one bad row cannot block the rest.
    pub async fn list_pending(&self) -> Result<Vec<QueueItem>, QueueError> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!("{} ORDER BY seq", SELECT_ITEMS))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                row.decode().map_err(|c| QueueError::Corrupt {
                    id: c.id,
                    reason: c.reason,
                })
            })
            .collect()
    }

    pub async fn load_due(&self, now: DateTime<Utc>) -> Result<DueItems, QueueError> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!("{} ORDER BY seq", SELECT_ITEMS))
            .fetch_all(&self.pool)
            .await?;

        let mut due = DueItems::default();
        for row in rows {
            match row.decode() {
                Ok(item) if item.is_due(now) => due.ready.push(item),
                Ok(_) => due.waiting += 1,
                Err(corrupt) => due.corrupt.push(corrupt),
            }
        }
        Ok(due)
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueError> {
        let row: Option<QueueRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_ITEMS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.decode().map(Some).map_err(|c| QueueError::Corrupt {
                id: c.id,
                reason: c.reason,
            }),
            None => Ok(None),
        }
    }

    pub async fn count(&self) -> Result<usize, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM queue_items")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Stores the outcome of a failed attempt: new retry count and when to try again.
    pub async fn record_failure(
        &self,
        id: &str,
        retry_count: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_items SET retry_count = ?, next_attempt_at = ? WHERE id = ?")
            .bind(retry_count as i64)
            .bind(next_attempt_at.map(|at| at.to_rfc3339()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Moves an item out of the queue into the dead-letter list.
    ///
    /// Works on the raw row so unreadable items can be parked too.
    pub async fn move_to_dead_letter(&self, id: &str, error: &str) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR REPLACE INTO dead_letters (id, entity_type, operation, payload, base, created_at, retry_count, last_error, dead_at)
            SELECT id, entity_type, operation, payload, base, created_at, retry_count, ?, ?
            FROM queue_items WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if inserted > 0 {
            tracing::warn!("Moved queue item {} to dead letters: {}", id, error);
        }
        Ok(inserted > 0)
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows: Vec<DeadLetter> = sqlx::query_as(
            "SELECT id, entity_type, operation, payload, base, created_at, retry_count, last_error, dead_at FROM dead_letters ORDER BY dead_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Puts a dead letter back at the end of the queue with a fresh retry budget.
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO queue_items (id, entity_type, operation, payload, base, created_at, retry_count)
            SELECT id, entity_type, operation, payload, base, created_at, 0
            FROM dead_letters WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM dead_letters WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted > 0)
    }

    pub async fn purge_dead_letters(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM dead_letters")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    async fn setup() -> (TempDir, QueueRepository) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("queue.db")).await.unwrap();
        (temp_dir, QueueRepository::new(pool))
    }

    fn equipment(op: Operation, payload: serde_json::Value) -> NewQueueItem {
        NewQueueItem::new(EntityType::Equipment, op, payload)
    }

    #[tokio::test]
    async fn test_enqueue_and_list_in_order() {
        let (_dir, repo) = setup().await;

        let first = repo
            .enqueue(equipment(Operation::Create, json!({"name": "Pump"})))
            .await
            .unwrap();
        let second = repo
            .enqueue(equipment(Operation::Update, json!({"id": "eq-1", "name": "Pump 2"})))
            .await
            .unwrap();
        let third = repo
            .enqueue(NewQueueItem::new(
                EntityType::Part,
                Operation::Delete,
                json!({"id": "p-9"}),
            ))
            .await
            .unwrap();

        let pending = repo.list_pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str(), third.as_str()]);
        assert_eq!(pending[1].payload["name"], "Pump 2");
        assert_eq!(pending[2].entity_type, EntityType::Part);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_mutations_are_both_kept() {
        let (_dir, repo) = setup().await;

        for name in ["A", "B"] {
            repo.enqueue(equipment(Operation::Update, json!({"id": "eq-1", "name": name})))
                .await
                .unwrap();
        }

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload["name"], "A");
        assert_eq!(pending[1].payload["name"], "B");
    }

    #[tokio::test]
    async fn test_dequeue_succeeded() {
        let (_dir, repo) = setup().await;
        let a = repo
            .enqueue(equipment(Operation::Create, json!({})))
            .await
            .unwrap();
        let b = repo
            .enqueue(equipment(Operation::Create, json!({})))
            .await
            .unwrap();

        let removed = repo.dequeue_succeeded(&[a.clone()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(&a).await.unwrap().is_none());
        assert!(repo.get(&b).await.unwrap().is_some());

        assert_eq!(repo.dequeue_succeeded(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_and_load_due() {
        let (_dir, repo) = setup().await;
        let id = repo
            .enqueue(equipment(Operation::Create, json!({})))
            .await
            .unwrap();

        let now = Utc::now();
        repo.record_failure(&id, 1, Some(now + chrono::Duration::minutes(5)))
            .await
            .unwrap();

        let item = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 1);

        let due = repo.load_due(now).await.unwrap();
        assert!(due.ready.is_empty());
        assert_eq!(due.waiting, 1);

        let later = repo
            .load_due(now + chrono::Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(later.ready.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported_not_fatal() {
        let (_dir, repo) = setup().await;
        let good = repo
            .enqueue(equipment(Operation::Create, json!({"name": "ok"})))
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO queue_items (id, entity_type, operation, payload, created_at) VALUES ('bad', 'equipment', 'create', '{not json', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&repo.pool)
        .await
        .unwrap();

        let due = repo.load_due(Utc::now()).await.unwrap();
        assert_eq!(due.ready.len(), 1);
        assert_eq!(due.ready[0].id, good);
        assert_eq!(due.corrupt.len(), 1);
        assert_eq!(due.corrupt[0].id, "bad");

        let err = repo.list_pending().await.unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn test_dead_letter_roundtrip() {
        let (_dir, repo) = setup().await;
        let id = repo
            .enqueue(equipment(Operation::Delete, json!({"id": "eq-3"})))
            .await
            .unwrap();
        repo.record_failure(&id, 3, None).await.unwrap();

        assert!(repo.move_to_dead_letter(&id, "HTTP 500").await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);

        let dead = repo.list_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error, "HTTP 500");
        assert_eq!(dead[0].retry_count, 3);

        assert!(repo.requeue_dead_letter(&id).await.unwrap());
        let item = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 0);
        assert!(repo.list_dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_missing_item_is_noop() {
        let (_dir, repo) = setup().await;
        assert!(!repo.move_to_dead_letter("nope", "x").await.unwrap());
        assert!(!repo.requeue_dead_letter("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let (_dir, repo) = setup().await;
        repo.enqueue(equipment(Operation::Create, json!({})))
            .await
            .unwrap();
        assert_eq!(repo.clear().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
