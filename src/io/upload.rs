//! Multipart upload extraction
//!
//! `POST /api/measure` carries the photo in the multipart field `file`.
//! Other fields are skipped. The declared content type of that part must
//! start with `image/`; nothing is decoded before that check passes.

use bytes::Bytes;
use std::convert::Infallible;

/// Multipart field holding the photo
pub const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Expected a multipart/form-data request")]
    NotMultipart,

    #[error("Malformed multipart body: {0}")]
    Malformed(String),

    #[error("No file uploaded")]
    MissingFile,

    #[error("File must be an image")]
    NotAnImage,
}

/// The uploaded photo as received
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Upload {
    pub fn is_image(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| ct.starts_with("image/"))
    }

    /// Reject anything not declared as an image
    pub fn ensure_image(&self) -> Result<(), UploadError> {
        if self.is_image() {
            Ok(())
        } else {
            Err(UploadError::NotAnImage)
        }
    }
}

/// Multipart boundary from a request `Content-Type` header
pub fn boundary(content_type: Option<&str>) -> Result<String, UploadError> {
    let content_type = content_type.ok_or(UploadError::NotMultipart)?;
    multer::parse_boundary(content_type).map_err(|_| UploadError::NotMultipart)
}

/// Find the `file` field in an already collected multipart body
pub async fn extract_file(body: Bytes, boundary: String) -> Result<Upload, UploadError> {
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) =
        multipart.next_field().await.map_err(|e| UploadError::Malformed(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|e| UploadError::Malformed(e.to_string()))?;

        return Ok(Upload { filename, content_type, data });
    }

    Err(UploadError::MissingFile)
}
