/// Errors from the local queue database.
#[derive(Debug)]
pub enum QueueError {
    /// SQLite error.
    Database(sqlx::Error),
    /// A payload could not be serialized for storage.
    Serialization(serde_json::Error),
    /// A stored row could not be decoded.
    Corrupt { id: String, reason: String },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Database(e) => write!(f, "Database error: {}", e),
            QueueError::Serialization(e) => write!(f, "Failed to serialize payload: {}", e),
            QueueError::Corrupt { id, reason } => {
                write!(f, "Queue item {} is unreadable: {}", id, reason)
            }
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Database(e) => Some(e),
            QueueError::Serialization(e) => Some(e),
            QueueError::Corrupt { .. } => None,
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization(e)
    }
}
