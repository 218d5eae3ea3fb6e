//! Named response caches backed by SQLite.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use super::error::CacheError;
use super::network::Network;
use super::request::{CacheRequest, CachedResponse};

#[derive(sqlx::FromRow)]
struct EntryRow {
    url: String,
    status: i64,
    headers: String,
    body: Vec<u8>,
    body_sha256: String,
}

impl EntryRow {
    /// Decodes the row, or `None` when the stored body no longer matches its digest.
    fn decode(self) -> Option<CachedResponse> {
        if digest(&self.body) != self.body_sha256 {
            tracing::warn!("Dropping corrupt cache entry for {}", self.url);
            return None;
        }
        let headers = match serde_json::from_str(&self.headers) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!("Dropping cache entry for {}: {}", self.url, e);
                return None;
            }
        };
        Some(CachedResponse {
            status: u16::try_from(self.status).unwrap_or(200),
            headers,
            body: self.body,
        })
    }
}

fn digest(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

/// Named caches of GET responses keyed by URL.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    pool: SqlitePool,
}

impl CacheStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the named cache if it does not exist yet.
    pub async fn open(&self, name: &str) -> Result<(), CacheError> {
        sqlx::query("INSERT OR IGNORE INTO caches (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cache names in creation order.
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM caches ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn has(&self, name: &str) -> Result<bool, CacheError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT seq FROM caches WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Deletes a cache and all its entries.
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM caches WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn put(
        &self,
        cache_name: &str,
        url: &str,
        response: &CachedResponse,
    ) -> Result<(), CacheError> {
        self.open(cache_name).await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (cache_name, url, status, headers, body, body_sha256, stored_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cache_name)
        .bind(url)
        .bind(i64::from(response.status))
        .bind(serde_json::to_string(&response.headers)?)
        .bind(&response.body)
        .bind(digest(&response.body))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Looks `url` up in one cache.
    pub async fn match_in(
        &self,
        cache_name: &str,
        url: &str,
    ) -> Result<Option<CachedResponse>, CacheError> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT url, status, headers, body, body_sha256 FROM cache_entries WHERE cache_name = ? AND url = ?",
        )
        .bind(cache_name)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(EntryRow::decode))
    }

    /// Looks `url` up across all caches, oldest cache first.
    pub async fn match_any(&self, url: &str) -> Result<Option<CachedResponse>, CacheError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT e.url, e.status, e.headers, e.body, e.body_sha256
            FROM cache_entries e
            JOIN caches c ON c.name = e.cache_name
            WHERE e.url = ?
            ORDER BY c.seq
            "#,
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().find_map(EntryRow::decode))
    }

    /// URLs stored in a cache.
    pub async fn entries(&self, cache_name: &str) -> Result<Vec<String>, CacheError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")
                .bind(cache_name)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Fetches every URL and stores them all, or none if any fetch fails
    /// or returns a non-200 status.
    pub async fn add_all<N: Network>(
        &self,
        cache_name: &str,
        urls: &[String],
        network: &N,
    ) -> Result<usize, CacheError> {
        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let response = network
                .fetch(&CacheRequest::get(url.as_str()))
                .await
                .map_err(|e| CacheError::Precache {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            if !response.is_ok() {
                return Err(CacheError::Precache {
                    url: url.clone(),
                    reason: format!("status {}", response.status),
                });
            }
            fetched.push((url, response));
        }

        self.open(cache_name).await?;
        let mut tx = self.pool.begin().await?;
        for (url, response) in &fetched {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO cache_entries (cache_name, url, status, headers, body, body_sha256, stored_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cache_name)
            .bind(url.as_str())
            .bind(i64::from(response.status))
            .bind(serde_json::to_string(&response.headers)?)
            .bind(&response.body)
            .bind(digest(&response.body))
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(fetched.len())
    }
}
