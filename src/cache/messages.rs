//! Messages exchanged between pages and the caching proxy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Page to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Pre-warm the dynamic cache.
    CacheUrls { urls: Vec<String> },
}

/// Worker to page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Pages should replay their offline queue.
    SyncQueue { timestamp: DateTime<Utc> },
}

impl ClientMessage {
    pub fn sync_queue() -> Self {
        ClientMessage::SyncQueue {
            timestamp: Utc::now(),
        }
    }
}
