//! Per-request caching strategies.

use axum::http::Method;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::CacheError;
use super::network::Network;
use super::request::{CacheRequest, CachedResponse, Destination, RequestMode};
use super::storage::CacheStorage;
use super::{DYNAMIC_CACHE, OFFLINE_PAGE, OFFLINE_PLACEHOLDER, STATIC_CACHE};

const STATIC_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "gif", "webp", "svg", "woff", "woff2", "ttf", "otf",
];

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Straight to the network, never cached.
    Bypass,
    NetworkFirst,
    CacheFirst,
}

pub fn is_api_path(path: &str) -> bool {
    path.starts_with("/api/")
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    extension(path).is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// Picks the strategy for a request.
pub fn classify(request: &CacheRequest) -> Strategy {
    if request.method != Method::GET {
        return Strategy::Bypass;
    }

    let path = request.path();
    if is_api_path(path) {
        Strategy::NetworkFirst
    } else if matches!(request.destination, Destination::Image | Destination::Font)
        || has_extension(path, &STATIC_EXTENSIONS)
    {
        Strategy::CacheFirst
    } else {
        Strategy::NetworkFirst
    }
}

fn wants_image(request: &CacheRequest) -> bool {
    request.destination == Destination::Image || has_extension(request.path(), &IMAGE_EXTENSIONS)
}

/// The synthetic response for an API read with no network and no cache.
pub fn offline_response() -> CachedResponse {
    let body = serde_json::json!({
        "error": "offline",
        "message": "No network connection available",
    });
    CachedResponse::new(503, body.to_string()).with_header("content-type", "application/json")
}

/// Result of a background cache refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { url: String },
    /// Upstream answered with a non-200 status; the cached copy was kept.
    Skipped { url: String, status: u16 },
    Failed { url: String, error: String },
}

/// Serves requests through the caches and the network.
pub struct FetchHandler<N> {
    network: Arc<N>,
    storage: CacheStorage,
    refresh_events: Option<mpsc::UnboundedSender<RefreshOutcome>>,
}

impl<N: Network> FetchHandler<N> {
    pub fn new(network: Arc<N>, storage: CacheStorage) -> Self {
        Self {
            network,
            storage,
            refresh_events: None,
        }
    }

    /// Reports every background refresh outcome on `events`.
    pub fn with_refresh_events(mut self, events: mpsc::UnboundedSender<RefreshOutcome>) -> Self {
        self.refresh_events = Some(events);
        self
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub async fn handle(&self, request: &CacheRequest) -> Result<CachedResponse, CacheError> {
        match classify(request) {
            Strategy::Bypass => self.network.fetch(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        }
    }

    /// Caches a 200 response. A failed write is logged; the response is
    /// still served.
    async fn store(&self, url: &str, response: &CachedResponse) {
        if !response.is_ok() {
            return;
        }
        if let Err(e) = self.storage.put(DYNAMIC_CACHE, url, response).await {
            tracing::warn!("Could not cache {}: {}", url, e);
        }
    }

    /// Tries the network, caching 200 responses; falls back to any cache,
    /// then to the offline page or the offline API response.
    pub async fn network_first(&self, request: &CacheRequest) -> Result<CachedResponse, CacheError> {
        let network_error = match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&request.url, &response).await;
                return Ok(response);
            }
            Err(e) => e,
        };
        tracing::debug!("Network failed for {}: {}", request.url, network_error);

        if let Some(cached) = self.storage.match_any(&request.url).await? {
            return Ok(cached);
        }

        if request.mode == RequestMode::Navigate {
            return self
                .storage
                .match_in(STATIC_CACHE, OFFLINE_PAGE)
                .await?
                .ok_or_else(|| CacheError::Unavailable(request.url.clone()));
        }

        if is_api_path(request.path()) {
            return Ok(offline_response());
        }

        Err(network_error)
    }

    /// Serves a cached copy and refreshes it in the background; on a miss
    /// goes to the network, falling back to the placeholder for images.
    pub async fn cache_first(&self, request: &CacheRequest) -> Result<CachedResponse, CacheError> {
        if let Some(cached) = self.storage.match_any(&request.url).await? {
            self.refresh_in_background(request.clone());
            return Ok(cached);
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&request.url, &response).await;
                Ok(response)
            }
            Err(e) if wants_image(request) => {
                tracing::debug!("Serving placeholder for {}: {}", request.url, e);
                self.storage
                    .match_any(OFFLINE_PLACEHOLDER)
                    .await?
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Detached refresh of a cached entry. Errors are logged and reported
    /// on the refresh channel, never to the caller.
    pub fn refresh_in_background(&self, request: CacheRequest) -> JoinHandle<()> {
        let network = Arc::clone(&self.network);
        let storage = self.storage.clone();
        let events = self.refresh_events.clone();

        tokio::spawn(async move {
            let url = request.url.clone();
            let outcome = match network.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    match storage.put(DYNAMIC_CACHE, &url, &response).await {
                        Ok(()) => RefreshOutcome::Updated { url },
                        Err(e) => RefreshOutcome::Failed {
                            url,
                            error: e.to_string(),
                        },
                    }
                }
                Ok(response) => RefreshOutcome::Skipped {
                    url,
                    status: response.status,
                },
                Err(e) => RefreshOutcome::Failed {
                    url,
                    error: e.to_string(),
                },
            };

            if let RefreshOutcome::Failed { url, error } = &outcome {
                tracing::warn!("Background refresh of {} failed: {}", url, error);
            }
            if let Some(events) = events {
                let _ = events.send(outcome);
            }
        })
    }
}
