use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::Operation;
use super::queue_item::QueueItem;

/// Observational record of a failed remote application.
///
/// Independent of the queue item lifecycle: the item stays queued for retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub id: String,
    /// Usually an entity type name; `"sync"` for whole-run failures.
    pub entity_type: String,
    pub entity_id: String,
    pub operation: Operation,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl SyncError {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: Operation,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            error: error.into(),
            occurred_at: Utc::now(),
            retry_count,
        }
    }

    /// Error for a queue item, carrying its already-incremented retry count.
    pub fn for_item(item: &QueueItem, error: impl Into<String>) -> Self {
        Self::new(
            item.entity_type.as_str(),
            item.entity_id(),
            item.operation,
            error,
            item.retry_count,
        )
    }

    /// Error for a whole sync run that failed before touching any item.
    pub fn run_failed(error: impl Into<String>) -> Self {
        Self::new("sync", "all", Operation::Create, error, 0)
    }
}
