// Explicit per-session state machine
//
// Transitions keep derived text consistent with its inputs: replacing the
// image drops both results, replacing the extraction drops the translation.
// A stale translation (one describing a previous extraction) cannot be
// represented.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::core::errors::{SessionError, SessionResult};
use crate::core::types::{ImageMeta, SessionView, Stage, UploadedImage};

/// One client's workspace: the active upload and the two derived texts.
#[derive(Debug, Clone)]
pub struct ChartSession {
    image: Option<UploadedImage>,
    extracted_json: Option<String>,
    translated_json: Option<String>,
    last_touched: Instant,
}

impl ChartSession {
    pub fn new() -> Self {
        Self {
            image: None,
            extracted_json: None,
            translated_json: None,
            last_touched: Instant::now(),
        }
    }

    /// Current stage, derived from field presence.
    ///
    /// Transitions only ever fill fields left to right, so the match is
    /// total without representing inconsistent combinations.
    pub fn stage(&self) -> Stage {
        match (&self.image, &self.extracted_json, &self.translated_json) {
            (None, _, _) => Stage::NoImage,
            (Some(_), None, _) => Stage::ImageLoaded,
            (Some(_), Some(_), None) => Stage::Extracted,
            (Some(_), Some(_), Some(_)) => Stage::Translated,
        }
    }

    /// Transition: replace the active image (any stage -> ImageLoaded).
    /// Derived texts described the previous image and are dropped with it.
    pub fn set_image(&mut self, image: UploadedImage) {
        self.image = Some(image);
        self.extracted_json = None;
        self.translated_json = None;
        self.touch();
    }

    /// Transition: store an extraction result (requires an image ->
    /// Extracted). A stored translation described the previous extraction
    /// and is dropped.
    pub fn set_extraction(&mut self, text: String) -> SessionResult<()> {
        if self.image.is_none() {
            return Err(SessionError::NoImage);
        }
        self.extracted_json = Some(text);
        self.translated_json = None;
        self.touch();
        Ok(())
    }

    /// Transition: store a translation result (requires an extraction ->
    /// Translated).
    pub fn set_translation(&mut self, text: String) -> SessionResult<()> {
        if self.extracted_json.is_none() {
            return Err(SessionError::NoExtraction);
        }
        self.translated_json = Some(text);
        self.touch();
        Ok(())
    }

    /// Active image, required before extraction can run.
    pub fn require_image(&self) -> SessionResult<&UploadedImage> {
        self.image.as_ref().ok_or(SessionError::NoImage)
    }

    /// Extraction text, required before translation can run.
    pub fn require_extraction(&self) -> SessionResult<&str> {
        self.extracted_json
            .as_deref()
            .ok_or(SessionError::NoExtraction)
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn extracted_json(&self) -> Option<&str> {
        self.extracted_json.as_deref()
    }

    pub fn translated_json(&self) -> Option<&str> {
        self.translated_json.as_deref()
    }

    /// Read-only projection for the HTTP surface.
    pub fn view(&self, session_id: Uuid) -> SessionView {
        SessionView {
            session_id,
            stage: self.stage(),
            image: self.image.as_ref().map(|img| ImageMeta {
                filename: img.filename.clone(),
                mime_type: img.mime_type.clone(),
                kind: img.kind,
                size_bytes: img.size_bytes(),
            }),
            extracted_json: self.extracted_json.clone(),
            translated_json: self.translated_json.clone(),
        }
    }

    /// Mark the session as recently used (expiry bookkeeping).
    pub fn touch(&mut self) {
        self.last_touched = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_touched.elapsed()
    }
}

impl Default for ChartSession {
    fn default() -> Self {
        Self::new()
    }
}
