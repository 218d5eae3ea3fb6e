use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::entity_type::EntityType;
use super::operation::Operation;

/// A mutation made while offline, waiting to be replayed against the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub entity_type: EntityType,
    pub operation: Operation,
    pub payload: Value,
    /// Entity as the client saw it before editing, used to merge updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Id of the entity this mutation targets.
    ///
    /// Falls back to the queue item id when the payload carries none, which
    /// is the case for creates that let the server assign ids.
    pub fn entity_id(&self) -> String {
        match self.payload.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => self.id.clone(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (retries: {})",
            self.operation,
            self.entity_type,
            self.entity_id(),
            self.retry_count
        )
    }
}

/// Input for enqueueing; id, timestamp and retry count are assigned by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueItem {
    pub entity_type: EntityType,
    pub operation: Operation,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Value>,
}

impl NewQueueItem {
    pub fn new(entity_type: EntityType, operation: Operation, payload: Value) -> Self {
        Self {
            entity_type,
            operation,
            payload,
            base: None,
        }
    }

    pub fn with_base(mut self, base: Value) -> Self {
        self.base = Some(base);
        self
    }

    pub fn into_item(self) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4().to_string(),
            entity_type: self.entity_type,
            operation: self.operation,
            payload: self.payload,
            base: self.base,
            created_at: Utc::now(),
            retry_count: 0,
            next_attempt_at: None,
        }
    }
}
