// Library exports for the size chart extraction service

// Core modules
pub mod core;
pub mod flow;
pub mod services;
pub mod session;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, FlowError, ModelError, SessionError, UploadError},
    types::{CreatedSession, ErrorBody, ImageKind, ImageMeta, SessionView, Stage, UploadedImage},
};

pub use flow::ChartFlow;

pub use services::gemini::{ChartModel, GeminiClient, KeyRing};

pub use session::{ChartSession, SessionStore};

pub use utils::{Metrics, MetricsSnapshot};
