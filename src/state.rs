//! Display state for sync: queue length, last sync time and errors.
//!
//! [`SyncState::apply`] is a pure reducer. [`SyncStore`] owns the state,
//! runs the async actions against a [`SyncEngine`] and dispatches their
//! pending/fulfilled/rejected transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::models::{NewQueueItem, QueueItem, SyncError, SyncStatus};
use crate::sync::{RemoteApi, SyncEngine, SyncEngineError, SyncReport};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub queue: Vec<QueueItem>,
    pub is_processing_queue: bool,
}

/// Partial update of [`SyncStatus`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatusPatch {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_changes: Option<usize>,
    pub is_syncing: Option<bool>,
    pub sync_errors: Option<Vec<SyncError>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    AddToQueue(QueueItem),
    /// Replaces the queue with what storage holds.
    QueueLoaded(Vec<QueueItem>),
    RemoveFromQueue(String),
    ClearQueue,
    AddSyncError(SyncError),
    ClearSyncErrors,
    UpdateSyncStatus(SyncStatusPatch),
    SyncDataPending,
    SyncDataFulfilled {
        report: SyncReport,
        at: DateTime<Utc>,
    },
    SyncDataRejected(String),
    ProcessQueuePending,
    ProcessQueueFulfilled(SyncReport),
    ProcessQueueRejected(String),
}

impl SyncState {
    fn recount(&mut self) {
        self.status.pending_changes = self.queue.len();
    }

    pub fn apply(&mut self, action: SyncAction) {
        match action {
            SyncAction::AddToQueue(item) => {
                self.queue.push(item);
                self.recount();
            }
            SyncAction::QueueLoaded(items) => {
                self.queue = items;
                self.recount();
            }
            SyncAction::RemoveFromQueue(id) => {
                self.queue.retain(|item| item.id != id);
                self.recount();
            }
            SyncAction::ClearQueue => {
                self.queue.clear();
                self.recount();
            }
            SyncAction::AddSyncError(error) => self.status.sync_errors.push(error),
            SyncAction::ClearSyncErrors => self.status.sync_errors.clear(),
            SyncAction::UpdateSyncStatus(patch) => {
                if let Some(at) = patch.last_sync_at {
                    self.status.last_sync_at = Some(at);
                }
                if let Some(pending) = patch.pending_changes {
                    self.status.pending_changes = pending;
                }
                if let Some(syncing) = patch.is_syncing {
                    self.status.is_syncing = syncing;
                }
                if let Some(errors) = patch.sync_errors {
                    self.status.sync_errors = errors;
                }
            }
            SyncAction::SyncDataPending => self.status.is_syncing = true,
            SyncAction::SyncDataFulfilled { report, at } => {
                self.status.is_syncing = false;
                self.status.last_sync_at = Some(at);
                self.status.sync_errors = report.errors;
            }
            SyncAction::SyncDataRejected(message) => {
                self.status.is_syncing = false;
                let message = if message.is_empty() {
                    "Sync failed".to_string()
                } else {
                    message
                };
                self.status.sync_errors.push(SyncError::run_failed(message));
            }
            SyncAction::ProcessQueuePending => self.is_processing_queue = true,
            SyncAction::ProcessQueueFulfilled(report) => {
                self.is_processing_queue = false;
                self.queue
                    .retain(|item| !report.succeeded.iter().any(|done| done.id == item.id));
                self.recount();
                self.status.sync_errors.extend(report.errors);
            }
            SyncAction::ProcessQueueRejected(message) => {
                self.is_processing_queue = false;
                tracing::warn!("Processing offline queue failed: {}", message);
            }
        }
    }
}

/// Owns the sync state and the engine the async actions run on.
pub struct SyncStore<R> {
    engine: SyncEngine<R>,
    state: watch::Sender<SyncState>,
}

impl<R: RemoteApi> SyncStore<R> {
    pub fn new(engine: SyncEngine<R>) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self { engine, state }
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: SyncAction) {
        self.state.send_modify(|state| state.apply(action));
    }

    /// Loads the queue and status from storage.
    pub async fn load(&self) -> Result<(), SyncEngineError> {
        let queue = self.engine.queue().list_pending().await?;
        let status = self.engine.status().await?;

        self.dispatch(SyncAction::QueueLoaded(queue));
        self.dispatch(SyncAction::UpdateSyncStatus(SyncStatusPatch {
            last_sync_at: status.last_sync_at,
            sync_errors: Some(status.sync_errors),
            ..SyncStatusPatch::default()
        }));
        Ok(())
    }

    /// Persists a mutation and adds it to the displayed queue.
    pub async fn enqueue(&self, item: NewQueueItem) -> Result<String, SyncEngineError> {
        let id = self.engine.queue().enqueue(item).await?;
        if let Some(stored) = self.engine.queue().get(&id).await? {
            self.dispatch(SyncAction::AddToQueue(stored));
        }
        Ok(id)
    }

    async fn reload_queue(&self) -> Result<(), SyncEngineError> {
        let queue = self.engine.queue().list_pending().await?;
        self.dispatch(SyncAction::QueueLoaded(queue));
        Ok(())
    }

    /// Runs a full sync.
    pub async fn sync_data(&self) -> Result<SyncReport, SyncEngineError> {
        self.dispatch(SyncAction::SyncDataPending);

        match self.engine.sync_all().await {
            Ok(report) if report.skipped => {
                self.dispatch(SyncAction::UpdateSyncStatus(SyncStatusPatch {
                    is_syncing: Some(false),
                    ..SyncStatusPatch::default()
                }));
                Ok(report)
            }
            Ok(report) => {
                self.dispatch(SyncAction::SyncDataFulfilled {
                    report: report.clone(),
                    at: Utc::now(),
                });
                self.reload_queue().await?;
                Ok(report)
            }
            Err(e) => {
                self.dispatch(SyncAction::SyncDataRejected(e.to_string()));
                Err(e)
            }
        }
    }

    /// Replays the items currently shown in the queue.
    pub async fn process_offline_queue(&self) -> Result<SyncReport, SyncEngineError> {
        let items = self.state.borrow().queue.clone();
        self.dispatch(SyncAction::ProcessQueuePending);

        match self.engine.process_queue(items).await {
            Ok(report) => {
                self.dispatch(SyncAction::ProcessQueueFulfilled(report.clone()));
                if !report.skipped {
                    self.reload_queue().await?;
                }
                Ok(report)
            }
            Err(e) => {
                self.dispatch(SyncAction::ProcessQueueRejected(e.to_string()));
                Err(e)
            }
        }
    }

    /// Clears the persisted error log and the displayed errors.
    pub async fn clear_sync_errors(&self) -> Result<(), SyncEngineError> {
        self.engine.clear_errors().await?;
        self.dispatch(SyncAction::ClearSyncErrors);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{EntityType, Operation, PendingUpload};
    use crate::sync::{FailedItem, RemoteError, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn item(name: &str) -> QueueItem {
        NewQueueItem::new(EntityType::Part, Operation::Create, json!({ "name": name })).into_item()
    }

    #[test]
    fn test_queue_actions_keep_pending_count() {
        let mut state = SyncState::default();
        let a = item("a");
        let b = item("b");

        state.apply(SyncAction::AddToQueue(a.clone()));
        state.apply(SyncAction::AddToQueue(b.clone()));
        assert_eq!(state.status.pending_changes, 2);

        state.apply(SyncAction::RemoveFromQueue(a.id.clone()));
        assert_eq!(state.queue, vec![b]);
        assert_eq!(state.status.pending_changes, 1);

        state.apply(SyncAction::ClearQueue);
        assert!(state.queue.is_empty());
        assert_eq!(state.status.pending_changes, 0);
    }

    #[test]
    fn test_error_actions() {
        let mut state = SyncState::default();
        state.apply(SyncAction::AddSyncError(SyncError::run_failed("x")));
        assert_eq!(state.status.sync_errors.len(), 1);
        state.apply(SyncAction::ClearSyncErrors);
        assert!(state.status.sync_errors.is_empty());
    }

    #[test]
    fn test_update_sync_status_merges() {
        let mut state = SyncState::default();
        state.apply(SyncAction::UpdateSyncStatus(SyncStatusPatch {
            is_syncing: Some(true),
            ..SyncStatusPatch::default()
        }));
        assert!(state.status.is_syncing);
        assert!(state.status.last_sync_at.is_none());
    }

    #[test]
    fn test_sync_data_fulfilled_replaces_errors() {
        let mut state = SyncState::default();
        state.apply(SyncAction::AddSyncError(SyncError::run_failed("old")));
        state.apply(SyncAction::SyncDataPending);
        assert!(state.status.is_syncing);

        let fresh = SyncError::run_failed("new");
        let at = Utc::now();
        state.apply(SyncAction::SyncDataFulfilled {
            report: SyncReport {
                errors: vec![fresh.clone()],
                ..SyncReport::default()
            },
            at,
        });

        assert!(!state.status.is_syncing);
        assert_eq!(state.status.last_sync_at, Some(at));
        assert_eq!(state.status.sync_errors, vec![fresh]);
    }

    #[test]
    fn test_sync_data_rejected_appends_run_error() {
        let mut state = SyncState::default();
        state.apply(SyncAction::SyncDataPending);
        state.apply(SyncAction::SyncDataRejected(String::new()));

        assert!(!state.status.is_syncing);
        let error = &state.status.sync_errors[0];
        assert_eq!(error.entity_type, "sync");
        assert_eq!(error.entity_id, "all");
        assert_eq!(error.operation, Operation::Create);
        assert_eq!(error.error, "Sync failed");
        assert!(state.status.last_sync_at.is_none());
    }

    #[test]
    fn test_process_queue_fulfilled_removes_succeeded_and_appends_failures() {
        let mut state = SyncState::default();
        let ok = item("ok");
        let bad = item("bad");
        state.apply(SyncAction::QueueLoaded(vec![ok.clone(), bad.clone()]));
        state.apply(SyncAction::ProcessQueuePending);
        assert!(state.is_processing_queue);

        let error = SyncError::for_item(&bad, "Server returned status 500");
        state.apply(SyncAction::ProcessQueueFulfilled(SyncReport {
            succeeded: vec![ok],
            failed: vec![FailedItem {
                item: bad.clone(),
                error: error.error.clone(),
                will_retry: true,
            }],
            errors: vec![error],
            ..SyncReport::default()
        }));

        assert!(!state.is_processing_queue);
        assert_eq!(state.queue, vec![bad]);
        assert_eq!(state.status.pending_changes, 1);
        assert_eq!(state.status.sync_errors.len(), 1);
    }

    struct FlakyApi;

    impl RemoteApi for FlakyApi {
        async fn apply(&self, item: &QueueItem) -> Result<(), RemoteError> {
            if item.payload["name"] == "bad" {
                Err(RemoteError::Rejected {
                    status: 500,
                    message: String::new(),
                })
            } else {
                Ok(())
            }
        }

        async fn upload(&self, _upload: &PendingUpload) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    async fn store() -> (TempDir, SyncStore<FlakyApi>) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("q.db")).await.unwrap();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(60), Duration::from_secs(600));
        let store = SyncStore::new(SyncEngine::new(pool, FlakyApi, policy));
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_store_sync_data_mirrors_engine() {
        let (_dir, store) = store().await;
        store
            .enqueue(NewQueueItem::new(
                EntityType::Equipment,
                Operation::Create,
                json!({"name": "Pump"}),
            ))
            .await
            .unwrap();
        let bad = store
            .enqueue(NewQueueItem::new(
                EntityType::Equipment,
                Operation::Create,
                json!({"name": "bad"}),
            ))
            .await
            .unwrap();
        assert_eq!(store.state().status.pending_changes, 2);

        store.sync_data().await.unwrap();

        let state = store.state();
        assert!(!state.status.is_syncing);
        assert!(state.status.last_sync_at.is_some());
        assert_eq!(state.status.pending_changes, 1);
        assert_eq!(state.queue[0].id, bad);
        assert_eq!(state.queue[0].retry_count, 1);
        assert_eq!(state.status.sync_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_store_process_offline_queue() {
        let (_dir, store) = store().await;
        store
            .enqueue(NewQueueItem::new(EntityType::Location, Operation::Create, json!({})))
            .await
            .unwrap();

        let report = store.process_offline_queue().await.unwrap();
        assert_eq!(report.succeeded.len(), 1);

        let state = store.state();
        assert!(state.queue.is_empty());
        assert!(!state.is_processing_queue);
        assert!(state.status.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_repeated_process_offline_queue_dead_letters_failing_item() {
        let (_dir, store) = store().await;
        let bad = store
            .enqueue(NewQueueItem::new(EntityType::Part, Operation::Update, json!({"name": "bad"})))
            .await
            .unwrap();

        store.process_offline_queue().await.unwrap();
        let state = store.state();
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].retry_count, 1);

        store.process_offline_queue().await.unwrap();
        let last = store.process_offline_queue().await.unwrap();
        assert_eq!(last.dead_lettered, vec![bad]);

        let state = store.state();
        assert!(state.queue.is_empty());
        assert_eq!(state.status.pending_changes, 0);
        assert_eq!(store.engine().queue().list_dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_load_and_clear_errors() {
        let (_dir, store) = store().await;
        store
            .enqueue(NewQueueItem::new(EntityType::Part, Operation::Create, json!({"name": "bad"})))
            .await
            .unwrap();
        store.engine().sync_all().await.unwrap();

        let fresh = SyncStore::new(SyncEngine::new(
            store.engine().queue().pool().clone(),
            FlakyApi,
            RetryPolicy::default(),
        ));
        fresh.load().await.unwrap();
        let state = fresh.state();
        assert_eq!(state.status.pending_changes, 1);
        assert_eq!(state.status.sync_errors.len(), 1);
        assert!(state.status.last_sync_at.is_some());

        fresh.clear_sync_errors().await.unwrap();
        assert!(fresh.state().status.sync_errors.is_empty());
        assert_eq!(fresh.engine().error_log().count().await.unwrap(), 0);
    }
}
