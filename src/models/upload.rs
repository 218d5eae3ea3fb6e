use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity_type::EntityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Done,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Done => "done",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "done" => Ok(UploadStatus::Done),
            "failed" => Ok(UploadStatus::Failed),
            _ => Err(format!("Invalid upload status '{}'", s)),
        }
    }
}

/// A photo captured offline, waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpload {
    pub id: String,
    /// Entity the photo is attached to.
    pub entity_type: EntityType,
    pub entity_id: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(skip)]
    pub file: Vec<u8>,
    #[serde(skip)]
    pub compressed_file: Vec<u8>,
    pub status: UploadStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingUpload {
    pub fn new(
        file: Vec<u8>,
        compressed_file: Vec<u8>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            filename: "photo.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            file,
            compressed_file,
            status: UploadStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Bytes to send: the compressed variant when one was produced.
    pub fn upload_bytes(&self) -> &[u8] {
        if self.compressed_file.is_empty() {
            &self.file
        } else {
            &self.compressed_file
        }
    }
}
