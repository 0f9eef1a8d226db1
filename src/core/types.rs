// Shared types for the session workflow and its HTTP surface

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Accepted raster upload formats (jpg/jpeg/png per the upload surface)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Map a declared MIME type to an accepted kind.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    /// Map a filename extension to an accepted kind.
    pub fn from_extension(filename: &str) -> Option<Self> {
        let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }
}

/// Uploaded image payload. The bytes are passed through to the model
/// unmodified; only the declared type and sniffed kind are recorded.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub kind: ImageKind,
    /// MIME type forwarded to the model: the client's declared type when it
    /// names an accepted format, the sniffed kind's canonical type otherwise
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl UploadedImage {
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Position of a session in the workflow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NoImage,
    ImageLoaded,
    Extracted,
    Translated,
}

/// Image metadata echoed in session views (never the bytes themselves)
#[derive(Debug, Clone, Serialize)]
pub struct ImageMeta {
    pub filename: String,
    pub mime_type: String,
    pub kind: ImageKind,
    pub size_bytes: usize,
}

/// Read-only projection of one session: the stage, the upload, and the two
/// result panels.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_json: Option<String>,
}

/// Response body for session creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
}

/// Uniform JSON error body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
