// Workflow coordination: sessions on one side, the model on the other
//
// Handlers pass raw upload fields and session ids in; the flow owns upload
// validation, state transitions, and the model calls. The session lock is
// held across a model call, so two triggers on one session run one after
// the other while separate sessions proceed in parallel. Each trigger makes
// exactly one model call; transport retries live inside the client.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::errors::{FlowError, FlowResult, UploadError, UploadResult};
use crate::core::types::{ImageKind, SessionView, UploadedImage};
use crate::services::gemini::ChartModel;
use crate::session::SessionStore;
use crate::utils::Metrics;

pub struct ChartFlow {
    config: Arc<Config>,
    store: SessionStore,
    model: Arc<dyn ChartModel>,
    metrics: Option<Metrics>,
}

impl ChartFlow {
    pub fn new(
        config: Arc<Config>,
        store: SessionStore,
        model: Arc<dyn ChartModel>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            model,
            metrics,
        }
    }

    /// Open a fresh, empty session.
    pub fn create_session(&self) -> Uuid {
        self.store.create()
    }

    pub async fn session_view(&self, id: Uuid) -> FlowResult<SessionView> {
        Ok(self.store.view(id).await?)
    }

    pub fn drop_session(&self, id: Uuid) -> FlowResult<()> {
        Ok(self.store.remove(id)?)
    }

    /// Accept an upload and make it the session's active image. Earlier
    /// extraction or translation text described the previous image and is
    /// dropped by the transition.
    pub async fn upload_image(
        &self,
        id: Uuid,
        filename: Option<String>,
        declared_mime: Option<String>,
        bytes: Vec<u8>,
    ) -> FlowResult<SessionView> {
        let kind = validate_upload(
            filename.as_deref(),
            declared_mime.as_deref(),
            &bytes,
            self.config.max_upload_bytes(),
        )?;

        let mime_type = match declared_mime {
            Some(declared) if ImageKind::from_mime(&declared).is_some() => declared,
            _ => kind.mime().to_string(),
        };
        let size = bytes.len();
        let image = UploadedImage {
            filename: filename.unwrap_or_else(|| default_filename(kind)),
            kind,
            mime_type,
            bytes: Arc::new(bytes),
        };

        let mut session = self.store.lock(id).await?;
        session.set_image(image);
        if let Some(metrics) = &self.metrics {
            metrics.record_upload(size);
        }
        info!(
            "Session {}: image accepted ({} bytes, {})",
            id,
            size,
            kind.mime()
        );
        Ok(session.view(id))
    }

    /// Run the extraction call over the session's image and store the reply
    /// verbatim. A failed call leaves the session exactly as it was.
    pub async fn run_extraction(&self, id: Uuid) -> FlowResult<SessionView> {
        let mut session = self.store.lock(id).await?;
        let image = session.require_image()?.clone();

        let started = Instant::now();
        let text = self.model.extract_chart(&image).await.map_err(|err| {
            warn!("Session {}: extraction failed: {}", id, err);
            FlowError::Extraction(err)
        })?;

        session.set_extraction(text)?;
        info!(
            "Session {}: extraction completed in {:.2}s",
            id,
            started.elapsed().as_secs_f64()
        );
        Ok(session.view(id))
    }

    /// Run the translation call over the stored extraction text. Replaces
    /// any previous translation; a failed call stores nothing.
    pub async fn run_translation(&self, id: Uuid) -> FlowResult<SessionView> {
        let mut session = self.store.lock(id).await?;
        let extracted = session.require_extraction()?.to_string();

        let started = Instant::now();
        let text = self.model.translate_chart(&extracted).await.map_err(|err| {
            warn!("Session {}: translation failed: {}", id, err);
            FlowError::Translation(err)
        })?;

        session.set_translation(text)?;
        info!(
            "Session {}: translation completed in {:.2}s",
            id,
            started.elapsed().as_secs_f64()
        );
        Ok(session.view(id))
    }

    /// The active image's bytes for re-serving to the client.
    pub async fn image_bytes(&self, id: Uuid) -> FlowResult<(String, Arc<Vec<u8>>)> {
        let session = self.store.lock(id).await?;
        let image = session.require_image()?;
        Ok((image.mime_type.clone(), Arc::clone(&image.bytes)))
    }
}

/// Gate an upload: size limits first, then the declared type, then the
/// bytes themselves. The sniffed format decides the recorded kind because
/// declared types lie.
fn validate_upload(
    filename: Option<&str>,
    declared_mime: Option<&str>,
    bytes: &[u8],
    limit: usize,
) -> UploadResult<ImageKind> {
    if bytes.is_empty() {
        return Err(UploadError::EmptyFile);
    }
    if bytes.len() > limit {
        return Err(UploadError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }

    // Browsers that don't know a type send octet-stream; treat that the
    // same as no declaration and let the sniff decide.
    let declared = declared_mime.filter(|m| !m.is_empty() && *m != "application/octet-stream");
    match declared {
        Some(mime) => {
            if ImageKind::from_mime(mime).is_none() {
                return Err(UploadError::UnsupportedType {
                    declared: mime.to_string(),
                });
            }
        }
        None => {
            let extension = filename
                .map(Path::new)
                .and_then(|p| p.extension())
                .and_then(|e| e.to_str());
            if let Some(ext) = extension {
                if ImageKind::from_extension(ext).is_none() {
                    return Err(UploadError::UnsupportedType {
                        declared: ext.to_string(),
                    });
                }
            }
        }
    }

    sniff_kind(bytes).ok_or(UploadError::UnrecognizedData)
}

fn sniff_kind(bytes: &[u8]) -> Option<ImageKind> {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => Some(ImageKind::Jpeg),
        Ok(image::ImageFormat::Png) => Some(ImageKind::Png),
        _ => None,
    }
}

fn default_filename(kind: ImageKind) -> String {
    match kind {
        ImageKind::Jpeg => "upload.jpg".to_string(),
        ImageKind::Png => "upload.png".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ApiConfig, LimitsConfig, ServerConfig, SessionConfig};
    use crate::core::errors::{ModelError, ModelResult, SessionError};
    use crate::core::types::Stage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    fn jpeg_bytes() -> Vec<u8> {
        vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0x4a, 0x46, 0x49, 0x46]
    }

    #[derive(Default)]
    struct StubModel {
        extraction_calls: AtomicUsize,
        translation_calls: AtomicUsize,
        fail_extraction: AtomicBool,
        fail_translation: AtomicBool,
    }

    #[async_trait]
    impl ChartModel for StubModel {
        async fn extract_chart(&self, image: &UploadedImage) -> ModelResult<String> {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_extraction.load(Ordering::SeqCst) {
                return Err(ModelError::Upstream {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            Ok(format!("table:{}", image.filename))
        }

        async fn translate_chart(&self, extracted: &str) -> ModelResult<String> {
            self.translation_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_translation.load(Ordering::SeqCst) {
                return Err(ModelError::Upstream {
                    status: 429,
                    body: "quota".to_string(),
                });
            }
            Ok(format!("english:{}", extracted))
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: tracing::Level::INFO,
            },
            api: ApiConfig {
                api_keys: vec!["test-key".to_string()],
                extraction_model: "gemini-1.5-flash".to_string(),
                translation_model: "gemini-1.5-flash".to_string(),
                max_retries: 0,
                timeout_seconds: 5,
            },
            session: SessionConfig { ttl_seconds: 60 },
            limits: LimitsConfig {
                max_upload_bytes: 1024,
            },
        })
    }

    fn flow_with(model: Arc<StubModel>) -> ChartFlow {
        let store = SessionStore::new(Duration::from_secs(60), None);
        ChartFlow::new(test_config(), store, model, None)
    }

    #[tokio::test]
    async fn upload_then_extract_then_translate() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();

        let view = flow
            .upload_image(
                id,
                Some("chart.png".to_string()),
                Some("image/png".to_string()),
                png_bytes(),
            )
            .await
            .unwrap();
        assert_eq!(view.stage, Stage::ImageLoaded);

        let view = flow.run_extraction(id).await.unwrap();
        assert_eq!(view.stage, Stage::Extracted);
        assert_eq!(view.extracted_json.as_deref(), Some("table:chart.png"));

        let view = flow.run_translation(id).await.unwrap();
        assert_eq!(view.stage, Stage::Translated);
        assert_eq!(
            view.translated_json.as_deref(),
            Some("english:table:chart.png")
        );

        assert_eq!(model.extraction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.translation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_trigger_makes_exactly_one_model_call() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();
        flow.upload_image(id, Some("a.png".to_string()), None, png_bytes())
            .await
            .unwrap();

        flow.run_extraction(id).await.unwrap();
        flow.run_extraction(id).await.unwrap();
        flow.run_extraction(id).await.unwrap();

        assert_eq!(model.extraction_calls.load(Ordering::SeqCst), 3);
        assert_eq!(model.translation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extraction_without_image_makes_no_model_call() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();

        let err = flow.run_extraction(id).await.unwrap_err();
        assert!(matches!(err, FlowError::Session(SessionError::NoImage)));
        assert_eq!(model.extraction_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn translation_without_extraction_makes_no_model_call() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();
        flow.upload_image(id, Some("a.png".to_string()), None, png_bytes())
            .await
            .unwrap();

        let err = flow.run_translation(id).await.unwrap_err();
        assert!(matches!(err, FlowError::Session(SessionError::NoExtraction)));
        assert_eq!(model.translation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_extraction_leaves_the_session_untouched() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();
        flow.upload_image(id, Some("a.png".to_string()), None, png_bytes())
            .await
            .unwrap();

        model.fail_extraction.store(true, Ordering::SeqCst);
        let err = flow.run_extraction(id).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Extraction(ModelError::Upstream { status: 503, .. })
        ));

        let view = flow.session_view(id).await.unwrap();
        assert_eq!(view.stage, Stage::ImageLoaded);
        assert!(view.extracted_json.is_none());

        // The next trigger starts from the same state and succeeds.
        model.fail_extraction.store(false, Ordering::SeqCst);
        let view = flow.run_extraction(id).await.unwrap();
        assert_eq!(view.stage, Stage::Extracted);
    }

    #[tokio::test]
    async fn failed_translation_keeps_the_previous_result() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();
        flow.upload_image(id, Some("a.png".to_string()), None, png_bytes())
            .await
            .unwrap();
        flow.run_extraction(id).await.unwrap();
        flow.run_translation(id).await.unwrap();

        model.fail_translation.store(true, Ordering::SeqCst);
        let err = flow.run_translation(id).await.unwrap_err();
        assert!(matches!(err, FlowError::Translation(_)));

        // The stored translation still describes the current extraction.
        let view = flow.session_view(id).await.unwrap();
        assert_eq!(view.stage, Stage::Translated);
        assert_eq!(
            view.translated_json.as_deref(),
            Some("english:table:a.png")
        );
    }

    #[tokio::test]
    async fn reextraction_drops_the_stale_translation() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();
        flow.upload_image(id, Some("a.png".to_string()), None, png_bytes())
            .await
            .unwrap();
        flow.run_extraction(id).await.unwrap();
        flow.run_translation(id).await.unwrap();

        let view = flow.run_extraction(id).await.unwrap();
        assert_eq!(view.stage, Stage::Extracted);
        assert!(view.translated_json.is_none());
        assert_eq!(model.translation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reupload_resets_downstream_results() {
        let model = Arc::new(StubModel::default());
        let flow = flow_with(Arc::clone(&model));
        let id = flow.create_session();
        flow.upload_image(id, Some("a.png".to_string()), None, png_bytes())
            .await
            .unwrap();
        flow.run_extraction(id).await.unwrap();
        flow.run_translation(id).await.unwrap();

        let view = flow
            .upload_image(id, Some("b.jpg".to_string()), None, jpeg_bytes())
            .await
            .unwrap();
        assert_eq!(view.stage, Stage::ImageLoaded);
        assert!(view.extracted_json.is_none());
        assert!(view.translated_json.is_none());
        assert_eq!(view.image.unwrap().filename, "b.jpg");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let flow = flow_with(Arc::new(StubModel::default()));
        let id = Uuid::new_v4();

        let err = flow.run_extraction(id).await.unwrap_err();
        assert!(matches!(err, FlowError::Session(SessionError::NotFound(_))));
        assert!(flow.session_view(id).await.is_err());
        assert!(flow.drop_session(id).is_err());
    }

    #[tokio::test]
    async fn upload_without_metadata_gets_a_default_name() {
        let flow = flow_with(Arc::new(StubModel::default()));
        let id = flow.create_session();

        let view = flow.upload_image(id, None, None, png_bytes()).await.unwrap();
        let meta = view.image.unwrap();
        assert_eq!(meta.filename, "upload.png");
        assert_eq!(meta.mime_type, "image/png");
    }

    #[tokio::test]
    async fn image_bytes_round_trip() {
        let flow = flow_with(Arc::new(StubModel::default()));
        let id = flow.create_session();
        flow.upload_image(
            id,
            Some("chart.png".to_string()),
            Some("image/png".to_string()),
            png_bytes(),
        )
        .await
        .unwrap();

        let (mime, bytes) = flow.image_bytes(id).await.unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(*bytes, png_bytes());
    }

    #[test]
    fn validate_accepts_png_by_sniff() {
        let kind =
            validate_upload(Some("chart.png"), Some("image/png"), &png_bytes(), 1024).unwrap();
        assert_eq!(kind, ImageKind::Png);
    }

    #[test]
    fn validate_trusts_bytes_over_declared_type() {
        // Declared JPEG with PNG bytes records PNG.
        let kind =
            validate_upload(Some("chart.jpg"), Some("image/jpeg"), &png_bytes(), 1024).unwrap();
        assert_eq!(kind, ImageKind::Png);
    }

    #[test]
    fn validate_rejects_declared_webp() {
        let err = validate_upload(Some("chart.webp"), Some("image/webp"), &png_bytes(), 1024)
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::UnsupportedType { declared } if declared == "image/webp"
        ));
    }

    #[test]
    fn validate_rejects_bad_extension_without_mime() {
        let err = validate_upload(Some("chart.gif"), None, &png_bytes(), 1024).unwrap_err();
        assert!(matches!(
            err,
            UploadError::UnsupportedType { declared } if declared == "gif"
        ));
    }

    #[test]
    fn validate_octet_stream_falls_back_to_sniffing() {
        let kind = validate_upload(
            None,
            Some("application/octet-stream"),
            &jpeg_bytes(),
            1024,
        )
        .unwrap();
        assert_eq!(kind, ImageKind::Jpeg);
    }

    #[test]
    fn validate_rejects_empty_and_oversized() {
        assert!(matches!(
            validate_upload(None, None, &[], 1024).unwrap_err(),
            UploadError::EmptyFile
        ));

        let big = vec![0u8; 2048];
        assert!(matches!(
            validate_upload(None, None, &big, 1024).unwrap_err(),
            UploadError::TooLarge {
                size: 2048,
                limit: 1024
            }
        ));
    }

    #[test]
    fn validate_rejects_unrecognizable_bytes() {
        let err =
            validate_upload(Some("chart.png"), Some("image/png"), &[0u8; 32], 1024).unwrap_err();
        assert!(matches!(err, UploadError::UnrecognizedData));
    }
}
