//! Photo helpers for offline uploads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;

use crate::models::{EntityType, PendingUpload};

const VALID_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Errors from photo handling.
#[derive(Debug)]
pub enum PhotoError {
    /// Could not read the image file.
    Io(std::io::Error),
    /// Mime type is not an accepted image type.
    InvalidType(String),
    /// String is not a base64 `data:` URL.
    InvalidDataUrl(String),
    /// Photos can only be attached to locations, equipment and parts.
    UnsupportedEntity(EntityType),
}

impl std::fmt::Display for PhotoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhotoError::Io(e) => write!(f, "Failed to read photo: {}", e),
            PhotoError::InvalidType(t) => write!(
                f,
                "Invalid image type '{}'. Valid types: {}",
                t,
                VALID_TYPES.join(", ")
            ),
            PhotoError::InvalidDataUrl(reason) => write!(f, "Invalid data URL: {}", reason),
            PhotoError::UnsupportedEntity(t) => {
                write!(f, "Photos cannot be attached to a {}", t)
            }
        }
    }
}

impl std::error::Error for PhotoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PhotoError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(e: std::io::Error) -> Self {
        PhotoError::Io(e)
    }
}

pub fn is_valid_image(mime_type: &str) -> bool {
    VALID_TYPES.contains(&mime_type.to_ascii_lowercase().as_str())
}

/// Guesses the mime type from a file extension.
pub fn mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn file_size_mb(len: usize) -> f64 {
    len as f64 / (1024.0 * 1024.0)
}

pub fn to_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Splits a base64 data URL into its mime type and decoded bytes.
pub fn from_data_url(data_url: &str) -> Result<(String, Vec<u8>), PhotoError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| PhotoError::InvalidDataUrl("missing 'data:' prefix".to_string()))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| PhotoError::InvalidDataUrl("missing ','".to_string()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| PhotoError::InvalidDataUrl("not base64 encoded".to_string()))?;

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| PhotoError::InvalidDataUrl(e.to_string()))?;
    let mime_type = if mime_type.is_empty() {
        "image/jpeg"
    } else {
        mime_type
    };
    Ok((mime_type.to_string(), bytes))
}

fn check_entity(entity_type: EntityType) -> Result<(), PhotoError> {
    if entity_type == EntityType::Photo {
        return Err(PhotoError::UnsupportedEntity(entity_type));
    }
    Ok(())
}

fn check_type(mime_type: &str) -> Result<(), PhotoError> {
    if is_valid_image(mime_type) {
        Ok(())
    } else {
        Err(PhotoError::InvalidType(mime_type.to_string()))
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Reads a photo from disk into a pending upload.
///
/// No re-encoding happens here; `compressed_file` is left empty and the
/// original bytes are sent.
pub async fn create_pending_upload(
    path: &Path,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<PendingUpload, PhotoError> {
    check_entity(entity_type)?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("photo.jpg")
        .to_string();
    let mime_type = mime_from_filename(&filename).unwrap_or("application/octet-stream");
    check_type(mime_type)?;

    let file = tokio::fs::read(path).await?;
    tracing::debug!("Read {} ({:.2} MB)", filename, file_size_mb(file.len()));

    Ok(PendingUpload::new(file, Vec::new(), entity_type, entity_id)
        .with_filename(filename)
        .with_mime_type(mime_type))
}

/// Builds a pending upload from a base64 data URL, the form the portal's
/// camera input hands over. `name` gets the extension matching the image type.
pub fn upload_from_data_url(
    data_url: &str,
    name: &str,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<PendingUpload, PhotoError> {
    check_entity(entity_type)?;
    let (mime_type, file) = from_data_url(data_url.trim())?;
    check_type(&mime_type)?;

    let filename = format!("{}.{}", name, extension_for(&mime_type));
    Ok(PendingUpload::new(file, Vec::new(), entity_type, entity_id)
        .with_filename(filename)
        .with_mime_type(mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_valid_image() {
        assert!(is_valid_image("image/jpeg"));
        assert!(is_valid_image("image/JPG"));
        assert!(is_valid_image("image/webp"));
        assert!(!is_valid_image("image/gif"));
        assert!(!is_valid_image("application/pdf"));
    }

    #[test]
    fn test_mime_from_filename() {
        assert_eq!(mime_from_filename("pump.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_filename("a/b/valve.png"), Some("image/png"));
        assert_eq!(mime_from_filename("notes.txt"), None);
        assert_eq!(mime_from_filename("noext"), None);
    }

    #[test]
    fn test_file_size_mb() {
        assert_eq!(file_size_mb(1024 * 1024), 1.0);
        assert_eq!(file_size_mb(512 * 1024), 0.5);
    }

    #[test]
    fn test_data_url() {
        let url = to_data_url(b"hello", "image/png");
        assert_eq!(url, "data:image/png;base64,aGVsbG8=");

        let (mime, bytes) = from_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"hello");

        assert!(from_data_url("aGVsbG8=").is_err());
        assert!(from_data_url("data:image/png,hello").is_err());
        assert!(from_data_url("data:image/png;base64,!!!").is_err());
    }

    #[tokio::test]
    async fn test_create_pending_upload() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("pump.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let upload = create_pending_upload(&path, EntityType::Equipment, "eq-1")
            .await
            .unwrap();
        assert_eq!(upload.filename, "pump.png");
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(upload.file, vec![1, 2, 3]);
        assert_eq!(upload.upload_bytes(), &[1, 2, 3]);
        assert_eq!(upload.entity_id, "eq-1");
    }

    #[tokio::test]
    async fn test_create_pending_upload_rejects_bad_input() {
        let temp_dir = tempdir().unwrap();
        let text = temp_dir.path().join("notes.txt");
        std::fs::write(&text, "x").unwrap();

        assert!(matches!(
            create_pending_upload(&text, EntityType::Part, "p-1").await,
            Err(PhotoError::InvalidType(_))
        ));
        let gif = temp_dir.path().join("anim.gif");
        std::fs::write(&gif, "x").unwrap();
        assert!(matches!(
            create_pending_upload(&gif, EntityType::Part, "p-1").await,
            Err(PhotoError::InvalidType(t)) if t == "application/octet-stream"
        ));
        assert!(matches!(
            create_pending_upload(&text, EntityType::Photo, "p-1").await,
            Err(PhotoError::UnsupportedEntity(_))
        ));
        assert!(matches!(
            create_pending_upload(&temp_dir.path().join("gone.jpg"), EntityType::Part, "p-1").await,
            Err(PhotoError::Io(_))
        ));
    }

    #[test]
    fn test_upload_from_data_url() {
        let url = to_data_url(&[7, 8, 9], "image/webp");
        let upload = upload_from_data_url(&url, "hatch", EntityType::Location, "loc-1").unwrap();
        assert_eq!(upload.filename, "hatch.webp");
        assert_eq!(upload.mime_type, "image/webp");
        assert_eq!(upload.file, vec![7, 8, 9]);

        let gif = to_data_url(b"GIF89a", "image/gif");
        assert!(matches!(
            upload_from_data_url(&gif, "anim", EntityType::Part, "p-1"),
            Err(PhotoError::InvalidType(t)) if t == "image/gif"
        ));
        assert!(matches!(
            upload_from_data_url(&url, "x", EntityType::Photo, "ph-1"),
            Err(PhotoError::UnsupportedEntity(_))
        ));
    }
}
