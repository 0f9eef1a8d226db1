pub mod client;
pub mod keys;
pub mod prompts;

pub use client::GeminiClient;
pub use keys::{KeyHealth, KeyRing, KeyStats};

use async_trait::async_trait;

use crate::core::errors::ModelResult;
use crate::core::types::UploadedImage;

/// The two model calls the workflow depends on. The production
/// implementation talks to Gemini; tests substitute their own.
#[async_trait]
pub trait ChartModel: Send + Sync {
    /// Read the size table out of an image. The reply text comes back
    /// verbatim, fences and all.
    async fn extract_chart(&self, image: &UploadedImage) -> ModelResult<String>;

    /// Translate previously extracted table text to English. Verbatim too.
    async fn translate_chart(&self, extracted: &str) -> ModelResult<String>;
}
