use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync_error::SyncError;

/// Aggregate view of the offline queue for display.
///
/// Derived from the queue and error log, never written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_changes: usize,
    pub is_syncing: bool,
    pub sync_errors: Vec<SyncError>,
}
