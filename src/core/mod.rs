pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, FlowError, ModelError, SessionError, UploadError};
pub use types::{
    CreatedSession, ErrorBody, ImageKind, ImageMeta, SessionView, Stage, UploadedImage,
};
