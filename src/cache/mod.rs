//! Local caching layer for portal traffic.
//!
//! Plays the part of the browser service worker: GET requests are served
//! through named caches with network-first or cache-first strategies, and
//! writes pass straight through. See [`strategy::classify`].

pub mod error;
pub mod messages;
pub mod network;
pub mod request;
pub mod storage;
pub mod strategy;
pub mod worker;

pub use error::CacheError;
pub use messages::{ClientMessage, WorkerMessage};
pub use network::{HttpNetwork, Network};
pub use request::{CacheRequest, CachedResponse, Destination, RequestMode};
pub use storage::CacheStorage;
pub use strategy::{classify, offline_response, FetchHandler, RefreshOutcome, Strategy};
pub use worker::{ServiceWorker, WorkerState};

pub const STATIC_CACHE: &str = "sms-onboarding-v1";
pub const DYNAMIC_CACHE: &str = "sms-dynamic-v1";
pub const API_CACHE: &str = "sms-api-v1";

/// Caches kept on activation; everything else is deleted.
pub const CACHE_NAMES: [&str; 3] = [STATIC_CACHE, DYNAMIC_CACHE, API_CACHE];

pub const OFFLINE_PAGE: &str = "/offline.html";
pub const OFFLINE_PLACEHOLDER: &str = "/images/offline-placeholder.svg";

/// Background sync tag that asks clients to replay their queue.
pub const SYNC_TAG: &str = "sync-offline-queue";
/// Periodic sync tag with the same effect.
pub const PERIODIC_SYNC_TAG: &str = "sync-data";

pub const STATIC_ASSETS: [&str; 8] = [
    "/",
    "/index.html",
    "/manifest.json",
    OFFLINE_PAGE,
    OFFLINE_PLACEHOLDER,
    "/images/sms-logo.svg",
    "/images/sms-logo-icon.svg",
    "/favicon.svg",
];

pub fn default_static_assets() -> Vec<String> {
    STATIC_ASSETS.iter().map(|s| s.to_string()).collect()
}
