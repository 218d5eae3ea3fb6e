//! Drains the offline queue against the remote API.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use super::client::RemoteApi;
use super::error::SyncEngineError;
use super::retry::RetryPolicy;
use crate::db::{
    CorruptItem, DataCache, QueueError, QueueRepository, SyncErrorLog, SyncMetadata,
    UploadRepository, DEFAULT_TTL,
};
use crate::models::{
    EntityType, Operation, PendingUpload, QueueItem, SyncError, SyncStatus, UploadStatus,
};

/// A queue item whose remote application failed during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    /// The item as it is stored after the failure (retry count bumped).
    pub item: QueueItem,
    pub error: String,
    /// False when the failure spent the retry budget and the item was dead-lettered.
    pub will_retry: bool,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub succeeded: Vec<QueueItem>,
    pub failed: Vec<FailedItem>,
    /// Errors recorded during this run, one per failure.
    pub errors: Vec<SyncError>,
    /// Items left untouched because an earlier item for the same entity failed.
    pub deferred: Vec<String>,
    /// Items still in backoff.
    pub waiting: usize,
    pub dead_lettered: Vec<String>,
    pub uploads_succeeded: Vec<String>,
    pub uploads_failed: Vec<String>,
    /// True when the run was skipped because another was in progress.
    pub skipped: bool,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Resets the in-progress flag when a run ends, including on error.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays queued mutations and photo uploads, one request at a time.
pub struct SyncEngine<R> {
    remote: R,
    queue: QueueRepository,
    errors: SyncErrorLog,
    uploads: UploadRepository,
    data_cache: DataCache,
    metadata: SyncMetadata,
    retry: RetryPolicy,
    in_progress: AtomicBool,
}

impl<R: RemoteApi> SyncEngine<R> {
    pub fn new(pool: SqlitePool, remote: R, retry: RetryPolicy) -> Self {
        Self {
            remote,
            queue: QueueRepository::new(pool.clone()),
            errors: SyncErrorLog::new(pool.clone()),
            uploads: UploadRepository::new(pool.clone()),
            data_cache: DataCache::new(pool.clone()),
            metadata: SyncMetadata::new(pool),
            retry,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &QueueRepository {
        &self.queue
    }

    pub fn error_log(&self) -> &SyncErrorLog {
        &self.errors
    }

    pub fn uploads(&self) -> &UploadRepository {
        &self.uploads
    }

    pub fn data_cache(&self) -> &DataCache {
        &self.data_cache
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.in_progress))
    }

    /// Drains every due item, then pending uploads.
    ///
    /// Items still in backoff are left for a later run.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncEngineError> {
        self.run(false).await
    }

    /// Like [`SyncEngine::sync_all`] but retries items still in backoff.
    pub async fn sync_all_now(&self) -> Result<SyncReport, SyncEngineError> {
        self.run(true).await
    }

    async fn run(&self, ignore_backoff: bool) -> Result<SyncReport, SyncEngineError> {
        let Some(_guard) = self.try_begin() else {
            tracing::warn!("Sync already in progress");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        };

        let now = Utc::now();
        let mut report = SyncReport::default();

        let horizon = if ignore_backoff {
            now.checked_add_signed(chrono::Duration::weeks(520))
                .unwrap_or(now)
        } else {
            now
        };
        let due = self.queue.load_due(horizon).await?;
        report.waiting = due.waiting;

        for corrupt in due.corrupt {
            self.dead_letter_corrupt(corrupt, &mut report).await?;
        }

        tracing::info!("Syncing {} queued change(s)", due.ready.len());
        self.process_items(due.ready, &mut report).await?;
        self.process_uploads(&mut report).await?;

        let expired = self.data_cache.clear_expired().await?;
        if expired > 0 {
            tracing::debug!("Dropped {} expired cache entries", expired);
        }

        self.metadata.set_last_sync_at(Utc::now()).await?;

        tracing::info!(
            "Sync finished: {} succeeded, {} failed, {} deferred, {} waiting",
            report.succeeded.len(),
            report.failed.len(),
            report.deferred.len(),
            report.waiting
        );
        Ok(report)
    }

    async fn dead_letter_corrupt(
        &self,
        corrupt: CorruptItem,
        report: &mut SyncReport,
    ) -> Result<(), SyncEngineError> {
        let message = format!("unreadable queue item: {}", corrupt.reason);
        let error = SyncError::new("queue", &corrupt.id, Operation::Create, &message, 0);
        self.errors.record(&error).await?;
        self.queue.move_to_dead_letter(&corrupt.id, &message).await?;
        report.errors.push(error);
        report.dead_lettered.push(corrupt.id);
        Ok(())
    }

    /// Replays an explicit list of items, ignoring backoff.
    ///
    /// Each item is re-read from the queue first: ids that were synced,
    /// removed or dead-lettered since the list was taken are skipped, and
    /// retry counts come from the stored row. Does not touch uploads or
    /// `last_sync_at`.
    pub async fn process_queue(&self, items: Vec<QueueItem>) -> Result<SyncReport, SyncEngineError> {
        let Some(_guard) = self.try_begin() else {
            tracing::warn!("Sync already in progress");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        };

        let mut report = SyncReport::default();
        let mut current = Vec::with_capacity(items.len());
        for item in items {
            match self.queue.get(&item.id).await {
                Ok(Some(stored)) => current.push(stored),
                Ok(None) => tracing::debug!("Skipping {}: no longer queued", item),
                Err(QueueError::Corrupt { id, reason }) => {
                    self.dead_letter_corrupt(CorruptItem { id, reason }, &mut report)
                        .await?
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.process_items(current, &mut report).await?;
        Ok(report)
    }

    async fn process_items(
        &self,
        items: Vec<QueueItem>,
        report: &mut SyncReport,
    ) -> Result<(), SyncEngineError> {
        // Entities with a failed item this run; later items for them wait
        let mut blocked: HashSet<(EntityType, String)> = HashSet::new();

        for item in items {
            let key = (item.entity_type, item.entity_id());
            if blocked.contains(&key) {
                tracing::debug!("Deferring {} behind an earlier failure", item);
                report.deferred.push(item.id);
                continue;
            }

            match self.remote.apply(&item).await {
                Ok(()) => {
                    tracing::debug!("Applied {}", item);
                    self.queue.dequeue_succeeded(&[item.id.clone()]).await?;
                    self.remember(&item).await;
                    report.succeeded.push(item);
                }
                Err(e) => {
                    blocked.insert(key);
                    let failed = self.record_item_failure(item, e.to_string(), report).await?;
                    report.failed.push(failed);
                }
            }
        }

        Ok(())
    }

    /// Keeps the last applied state of an entity for offline reads.
    async fn remember(&self, item: &QueueItem) {
        let entity_type = item.entity_type.as_str();
        let entity_id = item.entity_id();
        let result = match item.operation {
            Operation::Delete => self.data_cache.remove(entity_type, &entity_id).await.map(|_| ()),
            Operation::Create | Operation::Update => {
                self.data_cache
                    .put(entity_type, &entity_id, &item.payload, DEFAULT_TTL)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!("Could not cache {} {}: {}", entity_type, entity_id, e);
        }
    }

    /// Last applied copy of an entity, if it has not expired.
    pub async fn cached_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<serde_json::Value>, SyncEngineError> {
        Ok(self.data_cache.get(entity_type.as_str(), id).await?)
    }

    async fn record_item_failure(
        &self,
        mut item: QueueItem,
        message: String,
        report: &mut SyncReport,
    ) -> Result<FailedItem, SyncEngineError> {
        item.retry_count += 1;

        let error = SyncError::for_item(&item, &message);
        self.errors.record(&error).await?;
        report.errors.push(error);

        let will_retry = !self.retry.is_exhausted(item.retry_count);
        if will_retry {
            let next = self.retry.next_attempt_at(item.retry_count, Utc::now());
            self.queue
                .record_failure(&item.id, item.retry_count, Some(next))
                .await?;
            item.next_attempt_at = Some(next);
            tracing::warn!("Failed {}: {} (retry at {})", item, message, next);
        } else {
            self.queue
                .record_failure(&item.id, item.retry_count, None)
                .await?;
            self.queue.move_to_dead_letter(&item.id, &message).await?;
            item.next_attempt_at = None;
            report.dead_lettered.push(item.id.clone());
        }

        Ok(FailedItem {
            item,
            error: message,
            will_retry,
        })
    }

    async fn process_uploads(&self, report: &mut SyncReport) -> Result<(), SyncEngineError> {
        // Rows still marked uploading were cut off by an earlier run; the
        // in-progress flag guarantees none are in flight now
        let due = self.uploads.load_due(self.retry.max_retries).await?;

        for corrupt in due.corrupt {
            let message = format!("unreadable upload: {}", corrupt.reason);
            self.uploads
                .mark_unreadable(&corrupt.id, &message, self.retry.max_retries)
                .await?;
            let error = SyncError::new(
                EntityType::Photo.as_str(),
                &corrupt.id,
                Operation::Create,
                &message,
                self.retry.max_retries,
            );
            self.errors.record(&error).await?;
            tracing::warn!("Photo upload {} is unreadable: {}", corrupt.id, corrupt.reason);
            report.errors.push(error);
            report.uploads_failed.push(corrupt.id);
        }

        for upload in due.ready {
            self.process_upload(upload, report).await?;
        }
        Ok(())
    }

    async fn process_upload(
        &self,
        upload: PendingUpload,
        report: &mut SyncReport,
    ) -> Result<(), SyncEngineError> {
        self.uploads
            .update_status(&upload.id, UploadStatus::Uploading, None)
            .await?;

        match self.remote.upload(&upload).await {
            Ok(()) => {
                tracing::debug!("Uploaded photo {} for {}", upload.id, upload.entity_id);
                self.uploads.remove(&upload.id).await?;
                report.uploads_succeeded.push(upload.id);
            }
            Err(e) => {
                let message = e.to_string();
                self.uploads
                    .update_status(&upload.id, UploadStatus::Failed, Some(&message))
                    .await?;
                let error = SyncError::new(
                    EntityType::Photo.as_str(),
                    &upload.entity_id,
                    Operation::Create,
                    &message,
                    upload.retry_count + 1,
                );
                self.errors.record(&error).await?;
                tracing::warn!("Photo upload {} failed: {}", upload.id, message);
                report.errors.push(error);
                report.uploads_failed.push(upload.id);
            }
        }
        Ok(())
    }

    /// Current status, recomputed from storage.
    pub async fn status(&self) -> Result<SyncStatus, SyncEngineError> {
        Ok(SyncStatus {
            last_sync_at: self.metadata.last_sync_at().await?,
            pending_changes: self.queue.count().await?,
            is_syncing: self.is_syncing(),
            sync_errors: self.errors.list().await?,
        })
    }

    pub async fn clear_errors(&self) -> Result<u64, SyncEngineError> {
        Ok(self.errors.clear().await?)
    }
}
