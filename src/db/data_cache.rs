use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;

use super::QueueError;

/// Default lifetime of a cached entity snapshot.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Entity snapshots cached for offline reads, keyed by `<type>-<id>`.
#[derive(Debug, Clone)]
pub struct DataCache {
    pool: SqlitePool,
}

impl DataCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn key(data_type: &str, id: &str) -> String {
        format!("{}-{}", data_type, id)
    }

    pub async fn put(
        &self,
        data_type: &str,
        id: &str,
        data: &Value,
        ttl: Duration,
    ) -> Result<(), QueueError> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);

        sqlx::query(
            r#"
            INSERT INTO cached_data (key, data_type, data, stored_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                stored_at = excluded.stored_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(Self::key(data_type, id))
        .bind(data_type)
        .bind(serde_json::to_string(data)?)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the cached data, treating expired entries as absent.
    pub async fn get(&self, data_type: &str, id: &str) -> Result<Option<Value>, QueueError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM cached_data WHERE key = ? AND expires_at > ?")
                .bind(Self::key(data_type, id))
                .bind(Utc::now().timestamp_millis())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((data,)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, data_type: &str, id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM cached_data WHERE key = ?")
            .bind(Self::key(data_type, id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_expired(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM cached_data WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
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
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_and_expiry() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("q.db")).await.unwrap();
        let cache = DataCache::new(pool);

        cache
            .put("equipment", "eq-1", &json!({"name": "Pump"}), DEFAULT_TTL)
            .await
            .unwrap();
        cache
            .put("equipment", "eq-2", &json!({"name": "Valve"}), Duration::ZERO)
            .await
            .unwrap();

        let hit = cache.get("equipment", "eq-1").await.unwrap();
        assert_eq!(hit, Some(json!({"name": "Pump"})));
        assert!(cache.get("equipment", "eq-2").await.unwrap().is_none());
        assert!(cache.get("part", "eq-1").await.unwrap().is_none());

        assert_eq!(cache.clear_expired().await.unwrap(), 1);
        assert!(cache.get("equipment", "eq-1").await.unwrap().is_some());

        assert!(cache.remove("equipment", "eq-1").await.unwrap());
        assert!(cache.get("equipment", "eq-1").await.unwrap().is_none());
    }
}
