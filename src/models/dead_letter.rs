use serde::{Deserialize, Serialize};

/// A queue item that will not be retried automatically.
///
/// Fields are kept as stored so that undecodable items can still be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: String,
    pub entity_type: String,
    pub operation: String,
    pub payload: String,
    pub base: Option<String>,
    pub created_at: String,
    pub retry_count: i64,
    pub last_error: String,
    pub dead_at: String,
}
