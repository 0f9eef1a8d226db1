// Error types for the size-chart workflow
//
// One thiserror enum per concern so handlers can map failures to distinct
// HTTP statuses instead of collapsing everything into a generic fault.

use thiserror::Error;
use uuid::Uuid;

/// Configuration errors, rejected at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API keys configured (set GEMINI_API_KEYS or GOOGLE_API_KEY)")]
    NoApiKeys,

    #[error("Session TTL must be > 0 seconds, got {0}")]
    InvalidSessionTtl(u64),

    #[error("Upload body limit must be > 0 bytes, got {0}")]
    InvalidBodyLimit(usize),

    #[error("API timeout must be > 0 seconds, got {0}")]
    InvalidTimeout(u64),
}

/// Upload acceptance errors
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Multipart request did not contain an 'image' file field")]
    MissingFile,

    #[error("Unsupported upload type '{declared}' (accepted: jpg, jpeg, png)")]
    UnsupportedType { declared: String },

    #[error("Upload data is not a recognizable JPEG or PNG image")]
    UnrecognizedData,

    #[error("Upload is empty")]
    EmptyFile,

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Failed to read multipart field: {0}")]
    ReadFailed(String),
}

/// Session lookup and transition errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown session {0}")]
    NotFound(Uuid),

    #[error("No image uploaded yet; extraction requires an image")]
    NoImage,

    #[error("No extraction result yet; translation requires one")]
    NoExtraction,
}

/// Errors from the hosted model call
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("No usable API key in the ring")]
    NoApiKey,

    #[error("Model request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Model returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Model response contained no candidate text")]
    MissingText,

    #[error("Model response was not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("All {attempts} attempts exhausted, last status {last_status}")]
    AttemptsExhausted { attempts: u32, last_status: u16 },
}

impl ModelError {
    /// True for upstream conditions worth a retry or a 503 to the caller.
    pub fn is_throttled(&self) -> bool {
        match self {
            ModelError::Upstream { status, .. } => *status == 429 || *status == 503,
            ModelError::AttemptsExhausted { last_status, .. } => {
                *last_status == 429 || *last_status == 503
            }
            _ => false,
        }
    }
}

/// Aggregate error surfaced by the flow layer to the HTTP handlers
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Extraction failed: {0}")]
    Extraction(#[source] ModelError),

    #[error("Translation failed: {0}")]
    Translation(#[source] ModelError),
}

impl FlowError {
    pub fn model_error(&self) -> Option<&ModelError> {
        match self {
            FlowError::Extraction(e) | FlowError::Translation(e) => Some(e),
            _ => None,
        }
    }
}

// Convenience type aliases for Results
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type UploadResult<T> = Result<T, UploadError>;
pub type SessionResult<T> = Result<T, SessionError>;
pub type ModelResult<T> = Result<T, ModelError>;
pub type FlowResult<T> = Result<T, FlowError>;
