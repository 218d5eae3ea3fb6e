/// Errors from the cache layer.
#[derive(Debug)]
pub enum CacheError {
    /// Cache storage (SQLite) failed.
    Database(sqlx::Error),
    /// Stored headers could not be encoded.
    Serialization(serde_json::Error),
    /// The upstream could not be reached.
    Network(String),
    /// Pre-caching failed; nothing from the batch was stored.
    Precache { url: String, reason: String },
    /// Nothing to serve: network failed and no fallback applies.
    Unavailable(String),
}

impl CacheError {
    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::Network(_))
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Database(e) => write!(f, "Cache storage error: {}", e),
            CacheError::Serialization(e) => write!(f, "Failed to encode headers: {}", e),
            CacheError::Network(msg) => write!(f, "Network error: {}", msg),
            CacheError::Precache { url, reason } => {
                write!(f, "Failed to cache {}: {}", url, reason)
            }
            CacheError::Unavailable(url) => write!(f, "{} is not available offline", url),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Database(e) => Some(e),
            CacheError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Database(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(e: reqwest::Error) -> Self {
        CacheError::Network(e.to_string())
    }
}
