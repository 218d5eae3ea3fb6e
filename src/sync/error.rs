//! Sync error types.

use crate::db::QueueError;

/// Errors from applying a queued mutation to the remote API.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Request never reached the server (offline, DNS, timeout).
    Network(String),
    /// Server answered with a non-success status.
    Rejected { status: u16, message: String },
    /// The queued payload lacks what the route needs (e.g. an id).
    InvalidPayload(String),
    /// Server response could not be decoded.
    Decode(String),
}

impl RemoteError {
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Network(e) => write!(f, "Network error: {}", e),
            RemoteError::Rejected { status, message } if message.is_empty() => {
                write!(f, "Server returned status {}", status)
            }
            RemoteError::Rejected { status, message } => {
                write!(f, "Server returned status {}: {}", status, message)
            }
            RemoteError::InvalidPayload(e) => write!(f, "Invalid payload: {}", e),
            RemoteError::Decode(e) => write!(f, "Invalid server response: {}", e),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Errors that abort a whole sync run.
///
/// Per-item remote failures never end up here; they become `SyncError` records.
#[derive(Debug)]
pub enum SyncEngineError {
    /// The local queue could not be read or updated.
    Storage(QueueError),
}

impl std::fmt::Display for SyncEngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEngineError::Storage(e) => write!(f, "Offline queue storage error: {}", e),
        }
    }
}

impl std::error::Error for SyncEngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncEngineError::Storage(e) => Some(e),
        }
    }
}

impl From<QueueError> for SyncEngineError {
    fn from(e: QueueError) -> Self {
        SyncEngineError::Storage(e)
    }
}
