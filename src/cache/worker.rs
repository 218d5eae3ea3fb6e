//! Worker lifecycle, messages and sync events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::error::CacheError;
use super::messages::{ClientMessage, WorkerMessage};
use super::network::Network;
use super::request::{CacheRequest, CachedResponse};
use super::storage::CacheStorage;
use super::strategy::{FetchHandler, RefreshOutcome};
use super::{
    default_static_assets, CACHE_NAMES, DYNAMIC_CACHE, PERIODIC_SYNC_TAG, STATIC_CACHE, SYNC_TAG,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting to take over.
    Installed,
    Activating,
    Activated,
    /// The last install failed. Requests pass through unless an earlier
    /// activation still controls them.
    Redundant,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        write!(f, "{}", name)
    }
}

/// Caching worker in front of the portal.
///
/// Until activated every request passes straight through to the network.
/// Once activated the worker keeps controlling requests, including while a
/// later install runs or after it fails.
pub struct ServiceWorker<N> {
    handler: FetchHandler<N>,
    static_assets: Vec<String>,
    state: watch::Sender<WorkerState>,
    controlling: AtomicBool,
    clients: broadcast::Sender<ClientMessage>,
}

impl<N: Network> ServiceWorker<N> {
    pub fn new(network: N, storage: CacheStorage) -> Self {
        Self::from_handler(FetchHandler::new(Arc::new(network), storage))
    }

    pub fn from_handler(handler: FetchHandler<N>) -> Self {
        let (state, _) = watch::channel(WorkerState::Parsed);
        let (clients, _) = broadcast::channel(16);
        Self {
            handler,
            static_assets: default_static_assets(),
            state,
            controlling: AtomicBool::new(false),
            clients,
        }
    }

    pub fn with_static_assets(mut self, assets: Vec<String>) -> Self {
        self.static_assets = assets;
        self
    }

    pub fn with_refresh_events(
        mut self,
        events: tokio::sync::mpsc::UnboundedSender<RefreshOutcome>,
    ) -> Self {
        self.handler = self.handler.with_refresh_events(events);
        self
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// True once requests go through the caching strategies.
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::Acquire)
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn network(&self) -> &N {
        self.handler.network()
    }

    pub fn storage(&self) -> &CacheStorage {
        self.handler.storage()
    }

    fn set_state(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!("Worker {} -> {}", previous, next);
        }
    }

    /// Pre-caches the static assets. All or nothing.
    pub async fn install(&self) -> Result<usize, CacheError> {
        self.set_state(WorkerState::Installing);
        match self
            .handler
            .storage()
            .add_all(STATIC_CACHE, &self.static_assets, self.handler.network())
            .await
        {
            Ok(count) => {
                tracing::info!("Cached {} static asset(s)", count);
                self.set_state(WorkerState::Installed);
                Ok(count)
            }
            Err(e) => {
                tracing::error!("Install failed: {}", e);
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Deletes every cache outside the known set and starts controlling requests.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        self.set_state(WorkerState::Activating);

        let mut deleted = Vec::new();
        for name in self.handler.storage().keys().await? {
            if !CACHE_NAMES.contains(&name.as_str()) {
                tracing::info!("Clearing old cache: {}", name);
                self.handler.storage().delete(&name).await?;
                deleted.push(name);
            }
        }

        self.set_state(WorkerState::Activated);
        self.controlling.store(true, Ordering::Release);
        Ok(deleted)
    }

    /// Install, then take over right away.
    ///
    /// If install fails but an earlier run left a static cache behind, that
    /// cache is activated instead. The install error is still returned so
    /// the caller can try again once the upstream is back.
    pub async fn start(&self) -> Result<(), CacheError> {
        match self.install().await {
            Ok(_) => self.skip_waiting().await,
            Err(e) => {
                if self.resume().await? {
                    tracing::warn!("Install failed, serving the cache from an earlier install");
                }
                Err(e)
            }
        }
    }

    /// Activates the static cache persisted by an earlier install, if any.
    pub async fn resume(&self) -> Result<bool, CacheError> {
        let storage = self.handler.storage();
        if !storage.has(STATIC_CACHE).await? || storage.entries(STATIC_CACHE).await?.is_empty() {
            return Ok(false);
        }
        self.activate().await?;
        Ok(true)
    }

    /// Activates a worker that is installed and waiting; otherwise does nothing.
    pub async fn skip_waiting(&self) -> Result<(), CacheError> {
        if self.state() == WorkerState::Installed {
            self.activate().await?;
        }
        Ok(())
    }

    pub async fn handle_message(&self, message: WorkerMessage) -> Result<(), CacheError> {
        match message {
            WorkerMessage::SkipWaiting => self.skip_waiting().await,
            WorkerMessage::CacheUrls { urls } => {
                let count = self
                    .handler
                    .storage()
                    .add_all(DYNAMIC_CACHE, &urls, self.handler.network())
                    .await?;
                tracing::debug!("Pre-cached {} url(s)", count);
                Ok(())
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
        self.clients.subscribe()
    }

    /// Sends `SYNC_QUEUE` to every connected client. Returns how many got it.
    pub fn broadcast_sync(&self) -> usize {
        match self.clients.send(ClientMessage::sync_queue()) {
            Ok(count) => count,
            Err(_) => {
                tracing::debug!("No clients connected for SYNC_QUEUE");
                0
            }
        }
    }

    /// Handles a background sync event. Returns `None` for unknown tags.
    pub fn sync_event(&self, tag: &str) -> Option<usize> {
        (tag == SYNC_TAG).then(|| self.broadcast_sync())
    }

    /// Handles a periodic sync event. Returns `None` for unknown tags.
    pub fn periodic_sync_event(&self, tag: &str) -> Option<usize> {
        (tag == PERIODIC_SYNC_TAG).then(|| self.broadcast_sync())
    }

    pub async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, CacheError> {
        if !self.is_controlling() {
            return self.handler.network().fetch(request).await;
        }
        self.handler.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{API_CACHE, OFFLINE_PAGE};
    use crate::db::init_cache_db;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Answers 200 until switched offline; `/broken` is a 404.
    #[derive(Default)]
    struct SwitchNetwork {
        offline: AtomicBool,
    }

    impl Network for SwitchNetwork {
        async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, CacheError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(CacheError::Network("offline".to_string()));
            }
            if request.url == "/broken" {
                return Ok(CachedResponse::new(404, ""));
            }
            Ok(CachedResponse::new(200, format!("net {}", request.url)))
        }
    }

    async fn worker() -> (TempDir, ServiceWorker<SwitchNetwork>) {
        let temp_dir = tempdir().unwrap();
        let pool = init_cache_db(&temp_dir.path().join("cache.db")).await.unwrap();
        let worker = ServiceWorker::new(SwitchNetwork::default(), CacheStorage::new(pool));
        (temp_dir, worker)
    }

    #[tokio::test]
    async fn test_install_caches_static_assets() {
        let (_dir, worker) = worker().await;
        assert_eq!(worker.state(), WorkerState::Parsed);

        let count = worker.install().await.unwrap();
        assert_eq!(count, default_static_assets().len());
        assert_eq!(worker.state(), WorkerState::Installed);
        assert!(worker
            .storage()
            .match_in(STATIC_CACHE, OFFLINE_PAGE)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant_and_stores_nothing() {
        let (_dir, worker) = worker().await;
        let worker = worker.with_static_assets(vec!["/".to_string(), "/broken".to_string()]);

        assert!(worker.install().await.is_err());
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(worker.storage().entries(STATIC_CACHE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_start_offline_passes_through() {
        let (_dir, worker) = worker().await;
        worker.network().offline.store(true, Ordering::SeqCst);

        assert!(worker.start().await.is_err());
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(!worker.is_controlling());
        assert!(worker.fetch(&CacheRequest::get("/api/parts")).await.is_err());
    }

    #[tokio::test]
    async fn test_restart_while_offline_serves_persisted_cache() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("cache.db");
        {
            let pool = init_cache_db(&path).await.unwrap();
            let earlier = ServiceWorker::new(SwitchNetwork::default(), CacheStorage::new(pool.clone()));
            earlier.start().await.unwrap();
            earlier.fetch(&CacheRequest::get("/api/equipment")).await.unwrap();
            pool.close().await;
        }

        let pool = init_cache_db(&path).await.unwrap();
        let worker = ServiceWorker::new(SwitchNetwork::default(), CacheStorage::new(pool));
        worker.network().offline.store(true, Ordering::SeqCst);

        assert!(worker.start().await.is_err());
        assert_eq!(worker.state(), WorkerState::Activated);
        assert!(worker.is_controlling());

        let cached = worker.fetch(&CacheRequest::get("/api/equipment")).await.unwrap();
        assert_eq!(cached.body, b"net /api/equipment");
        let missing = worker.fetch(&CacheRequest::get("/api/parts")).await.unwrap();
        assert_eq!(missing.status, 503);

        // A failed reinstall leaves the earlier cache in control
        assert!(worker.install().await.is_err());
        assert_eq!(worker.state(), WorkerState::Redundant);
        let still_cached = worker.fetch(&CacheRequest::get("/api/equipment")).await.unwrap();
        assert_eq!(still_cached.body, b"net /api/equipment");

        worker.network().offline.store(false, Ordering::SeqCst);
        worker.start().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_activate_deletes_unknown_caches() {
        let (_dir, worker) = worker().await;
        for name in ["sms-onboarding-v0", STATIC_CACHE, DYNAMIC_CACHE, API_CACHE, "other"] {
            worker.storage().open(name).await.unwrap();
        }

        let deleted = worker.activate().await.unwrap();
        assert_eq!(deleted, vec!["sms-onboarding-v0".to_string(), "other".to_string()]);
        assert_eq!(
            worker.storage().keys().await.unwrap(),
            vec![
                STATIC_CACHE.to_string(),
                DYNAMIC_CACHE.to_string(),
                API_CACHE.to_string()
            ]
        );
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_activates_installed_worker() {
        let (_dir, worker) = worker().await;

        // Nothing to activate yet
        worker.handle_message(WorkerMessage::SkipWaiting).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Parsed);

        worker.install().await.unwrap();
        worker.handle_message(WorkerMessage::SkipWaiting).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_cache_urls_message_prewarms_dynamic_cache() {
        let (_dir, worker) = worker().await;
        worker
            .handle_message(WorkerMessage::CacheUrls {
                urls: vec!["/api/locations".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(
            worker.storage().entries(DYNAMIC_CACHE).await.unwrap(),
            vec!["/api/locations".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sync_events_broadcast_to_clients() {
        let (_dir, worker) = worker().await;
        assert_eq!(worker.sync_event(SYNC_TAG), Some(0));

        let mut first = worker.subscribe();
        let mut second = worker.subscribe();
        assert_eq!(worker.sync_event(SYNC_TAG), Some(2));
        assert_eq!(worker.periodic_sync_event(PERIODIC_SYNC_TAG), Some(2));
        assert_eq!(worker.sync_event("something-else"), None);
        assert_eq!(worker.periodic_sync_event(SYNC_TAG), None);

        for rx in [&mut first, &mut second] {
            assert!(matches!(rx.recv().await, Ok(ClientMessage::SyncQueue { .. })));
            assert!(matches!(rx.recv().await, Ok(ClientMessage::SyncQueue { .. })));
        }
    }

    #[tokio::test]
    async fn test_fetch_passes_through_until_activated() {
        let (_dir, worker) = worker().await;

        let response = worker.fetch(&CacheRequest::get("/api/y")).await.unwrap();
        assert_eq!(response.body, b"net /api/y");
        assert!(worker.storage().match_any("/api/y").await.unwrap().is_none());

        worker.start().await.unwrap();
        worker.fetch(&CacheRequest::get("/api/y")).await.unwrap();
        assert!(worker.storage().match_any("/api/y").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_offline_after_start_serves_cached_and_synthetic_responses() {
        let (_dir, worker) = worker().await;
        worker.start().await.unwrap();
        worker.fetch(&CacheRequest::get("/api/equipment")).await.unwrap();

        worker.network().offline.store(true, Ordering::SeqCst);

        let cached = worker.fetch(&CacheRequest::get("/api/equipment")).await.unwrap();
        assert_eq!(cached.body, b"net /api/equipment");

        let missing = worker.fetch(&CacheRequest::get("/api/parts")).await.unwrap();
        assert_eq!(missing.status, 503);
    }
}
