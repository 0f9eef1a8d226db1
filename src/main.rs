// HTTP entry point for the size chart extraction service

use sizechart_workflow::{
    core::{Config, ErrorBody, FlowError, SessionError, UploadError},
    core::types::{CreatedSession, SessionView},
    flow::ChartFlow,
    services::gemini::{ChartModel, GeminiClient, KeyRing},
    session::SessionStore,
    utils::Metrics,
};

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

/// How often the idle-session sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    flow: Arc<ChartFlow>,
    keys: Arc<KeyRing>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().expect("Failed to load configuration"));

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "sizechart_workflow={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== SIZE CHART EXTRACTION SERVICE ===");
    info!(
        "Config: extraction={} translation={} retries={} session_ttl={}s",
        config.extraction_model(),
        config.translation_model(),
        config.max_retries(),
        config.session_ttl().as_secs()
    );

    // Initialize metrics
    let metrics = Metrics::new();

    // Key ring shared between the client and the health endpoint
    let keys = Arc::new(KeyRing::new(config.api_keys().to_vec()));
    info!("API key ring loaded with {} key(s)", keys.total().await);

    // Session store with background idle expiry
    let store = SessionStore::new(config.session_ttl(), Some(metrics.clone()));
    store.start_expiry_task(SWEEP_INTERVAL);

    let model: Arc<dyn ChartModel> = Arc::new(GeminiClient::new(
        Arc::clone(&config),
        Arc::clone(&keys),
        Some(metrics.clone()),
    )?);
    let flow = Arc::new(ChartFlow::new(
        Arc::clone(&config),
        store,
        model,
        Some(metrics.clone()),
    ));

    let state = AppState {
        flow,
        keys,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing adds overhead on top of the file itself.
    let body_limit = config.max_upload_bytes() + 1024 * 1024;

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/api-keys", get(health_api_keys))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/session", post(create_session))
        .route("/session/:id", get(get_session).delete(delete_session))
        .route("/session/:id/image", post(upload_image).get(get_image))
        .route("/session/:id/extract", post(run_extraction))
        .route("/session/:id/translate", post(run_translation))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET    /                      - Root endpoint");
    info!("  GET    /health                - Health check");
    info!("  GET    /health/api-keys       - API key health status");
    info!("  GET    /metrics               - Prometheus metrics");
    info!("  GET    /stats                 - Detailed statistics");
    info!("  POST   /session               - Create a session");
    info!("  GET    /session/:id           - Session state");
    info!("  DELETE /session/:id           - Drop a session");
    info!("  POST   /session/:id/image     - Upload a chart image (multipart)");
    info!("  GET    /session/:id/image     - Serve the active image");
    info!("  POST   /session/:id/extract   - Run table extraction");
    info!("  POST   /session/:id/translate - Translate the extraction to English");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

type ErrorReply = (StatusCode, Json<ErrorBody>);

/// Map flow failures to HTTP statuses: missing sessions are 404, ordering
/// violations 409, bad uploads 4xx, model trouble 502/503.
fn error_reply(err: FlowError) -> ErrorReply {
    let status = match &err {
        FlowError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
        FlowError::Session(_) => StatusCode::CONFLICT,
        FlowError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        FlowError::Upload(UploadError::UnsupportedType { .. }) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        FlowError::Upload(_) => StatusCode::BAD_REQUEST,
        FlowError::Extraction(model) | FlowError::Translation(model) => {
            if model.is_throttled() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            }
        }
    };
    if status.is_server_error() {
        error!("{}", err);
    }
    (status, Json(ErrorBody::new(err.to_string())))
}

async fn root() -> &'static str {
    "Size Chart Extraction Service"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API key health status endpoint
async fn health_api_keys(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.keys.stats().await;
    let healthy = state.keys.healthy_count().await;
    Json(serde_json::json!({
        "status": if healthy > 0 { "healthy" } else { "degraded" },
        "total_keys": stats.len(),
        "healthy_keys": healthy,
        "keys": stats,
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CreatedSession>) {
    state.metrics.record_endpoint_request("/session");
    let id = state.flow.create_session();
    info!("Created session {}", id);
    (StatusCode::CREATED, Json(CreatedSession { session_id: id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ErrorReply> {
    let view = state.flow.session_view(id).await.map_err(error_reply)?;
    Ok(Json(view))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ErrorReply> {
    state.flow.drop_session(id).map_err(error_reply)?;
    info!("Dropped session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Image upload endpoint
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": one JPEG or PNG file
///
/// # Response:
/// - Updated SessionView JSON; derived texts are cleared by the new upload
async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, ErrorReply> {
    state.metrics.record_endpoint_request("/session/image");

    let mut upload: Option<(Option<String>, Option<String>, Vec<u8>)> = None;

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| error_reply(UploadError::ReadFailed(e.to_string()).into()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().map(|s| s.to_string());
        let declared_mime = field.content_type().map(|s| s.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| error_reply(UploadError::ReadFailed(e.to_string()).into()))?;
        upload = Some((filename, declared_mime, bytes.to_vec()));
        break;
    }

    let (filename, declared_mime, bytes) =
        upload.ok_or_else(|| error_reply(UploadError::MissingFile.into()))?;

    let view = state
        .flow
        .upload_image(id, filename, declared_mime, bytes)
        .await
        .map_err(error_reply)?;
    Ok(Json(view))
}

/// Serve the session's active image back to the client
async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorReply> {
    let (mime, bytes) = state.flow.image_bytes(id).await.map_err(error_reply)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime)],
        bytes.as_ref().clone(),
    ))
}

async fn run_extraction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ErrorReply> {
    state.metrics.record_endpoint_request("/session/extract");
    let view = state.flow.run_extraction(id).await.map_err(error_reply)?;
    Ok(Json(view))
}

async fn run_translation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ErrorReply> {
    state.metrics.record_endpoint_request("/session/translate");
    let view = state.flow.run_translation(id).await.map_err(error_reply)?;
    Ok(Json(view))
}
