use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which of the two model calls a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCallKind {
    Extraction,
    Translation,
}

/// Global metrics collector for the service.
///
/// Tracks model usage, uploads, and session churn. Thread-safe and shared
/// across handlers by cloning.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Model call metrics
    model_calls_total: AtomicUsize,
    model_calls_success: AtomicUsize,
    model_calls_failed: AtomicUsize,
    tokens_input: AtomicU64,
    tokens_output: AtomicU64,
    extraction_calls: AtomicUsize,
    translation_calls: AtomicUsize,
    extraction_latency_ms: RwLock<Vec<u64>>,
    translation_latency_ms: RwLock<Vec<u64>>,

    // Upload metrics
    uploads_total: AtomicUsize,
    upload_bytes_total: AtomicU64,

    // Session metrics
    sessions_open: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_expired: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                model_calls_total: AtomicUsize::new(0),
                model_calls_success: AtomicUsize::new(0),
                model_calls_failed: AtomicUsize::new(0),
                tokens_input: AtomicU64::new(0),
                tokens_output: AtomicU64::new(0),
                extraction_calls: AtomicUsize::new(0),
                translation_calls: AtomicUsize::new(0),
                extraction_latency_ms: RwLock::new(Vec::new()),
                translation_latency_ms: RwLock::new(Vec::new()),
                uploads_total: AtomicUsize::new(0),
                upload_bytes_total: AtomicU64::new(0),
                sessions_open: AtomicUsize::new(0),
                sessions_created: AtomicUsize::new(0),
                sessions_expired: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Model call metrics
    pub fn record_model_call(
        &self,
        kind: ModelCallKind,
        success: bool,
        duration: Duration,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        self.inner.model_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.model_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.model_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.tokens_input.fetch_add(input_tokens, Ordering::Relaxed);
        self.inner.tokens_output.fetch_add(output_tokens, Ordering::Relaxed);

        let millis = duration.as_millis() as u64;
        match kind {
            ModelCallKind::Extraction => {
                self.inner.extraction_calls.fetch_add(1, Ordering::Relaxed);
                self.inner.extraction_latency_ms.write().push(millis);
            }
            ModelCallKind::Translation => {
                self.inner.translation_calls.fetch_add(1, Ordering::Relaxed);
                self.inner.translation_latency_ms.write().push(millis);
            }
        }
    }

    // Upload metrics
    pub fn record_upload(&self, bytes: usize) {
        self.inner.uploads_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .upload_bytes_total
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // Session metrics
    pub fn record_session_created(&self) {
        self.inner.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_expired(&self, count: usize) {
        self.inner.sessions_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_open_sessions(&self, count: usize) {
        self.inner.sessions_open.store(count, Ordering::Relaxed);
    }

    // Endpoint metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let extraction_latency = self.inner.extraction_latency_ms.read();
        let extraction_latency_avg_ms = avg(&extraction_latency);
        let extraction_latency_p50_ms = percentile(&extraction_latency, 0.5);
        let extraction_latency_p95_ms = percentile(&extraction_latency, 0.95);
        drop(extraction_latency);

        let translation_latency = self.inner.translation_latency_ms.read();
        let translation_latency_avg_ms = avg(&translation_latency);
        let translation_latency_p50_ms = percentile(&translation_latency, 0.5);
        let translation_latency_p95_ms = percentile(&translation_latency, 0.95);
        drop(translation_latency);

        MetricsSnapshot {
            model_calls_total: self.inner.model_calls_total.load(Ordering::Relaxed),
            model_calls_success: self.inner.model_calls_success.load(Ordering::Relaxed),
            model_calls_failed: self.inner.model_calls_failed.load(Ordering::Relaxed),
            tokens_input: self.inner.tokens_input.load(Ordering::Relaxed),
            tokens_output: self.inner.tokens_output.load(Ordering::Relaxed),
            extraction_calls: self.inner.extraction_calls.load(Ordering::Relaxed),
            extraction_latency_avg_ms,
            extraction_latency_p50_ms,
            extraction_latency_p95_ms,
            translation_calls: self.inner.translation_calls.load(Ordering::Relaxed),
            translation_latency_avg_ms,
            translation_latency_p50_ms,
            translation_latency_p95_ms,
            uploads_total: self.inner.uploads_total.load(Ordering::Relaxed),
            upload_bytes_total: self.inner.upload_bytes_total.load(Ordering::Relaxed),
            sessions_open: self.inner.sessions_open.load(Ordering::Relaxed),
            sessions_created: self.inner.sessions_created.load(Ordering::Relaxed),
            sessions_expired: self.inner.sessions_expired.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP model_calls_total Total number of model calls made
# TYPE model_calls_total counter
model_calls_total {{}} {}

# HELP model_calls_success Number of successful model calls
# TYPE model_calls_success counter
model_calls_success {{}} {}

# HELP model_calls_failed Number of failed model calls
# TYPE model_calls_failed counter
model_calls_failed {{}} {}

# HELP model_tokens_input_total Total input tokens consumed
# TYPE model_tokens_input_total counter
model_tokens_input_total {{}} {}

# HELP model_tokens_output_total Total output tokens generated
# TYPE model_tokens_output_total counter
model_tokens_output_total {{}} {}

# HELP model_calls_by_op Model calls split by operation
# TYPE model_calls_by_op counter
model_calls_by_op {{op="extraction"}} {}
model_calls_by_op {{op="translation"}} {}

# HELP model_latency_avg_ms Average model latency in milliseconds
# TYPE model_latency_avg_ms gauge
model_latency_avg_ms {{op="extraction"}} {}
model_latency_avg_ms {{op="translation"}} {}

# HELP uploads_total Total number of accepted image uploads
# TYPE uploads_total counter
uploads_total {{}} {}

# HELP upload_bytes_total Total bytes of accepted image uploads
# TYPE upload_bytes_total counter
upload_bytes_total {{}} {}

# HELP sessions_open Current number of live sessions
# TYPE sessions_open gauge
sessions_open {{}} {}

# HELP sessions_created_total Total sessions created
# TYPE sessions_created_total counter
sessions_created_total {{}} {}

# HELP sessions_expired_total Total sessions dropped by idle expiry
# TYPE sessions_expired_total counter
sessions_expired_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.model_calls_total,
            snapshot.model_calls_success,
            snapshot.model_calls_failed,
            snapshot.tokens_input,
            snapshot.tokens_output,
            snapshot.extraction_calls,
            snapshot.translation_calls,
            snapshot.extraction_latency_avg_ms,
            snapshot.translation_latency_avg_ms,
            snapshot.uploads_total,
            snapshot.upload_bytes_total,
            snapshot.sessions_open,
            snapshot.sessions_created,
            snapshot.sessions_expired,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub model_calls_total: usize,
    pub model_calls_success: usize,
    pub model_calls_failed: usize,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub extraction_calls: usize,
    pub extraction_latency_avg_ms: u64,
    pub extraction_latency_p50_ms: u64,
    pub extraction_latency_p95_ms: u64,
    pub translation_calls: usize,
    pub translation_latency_avg_ms: u64,
    pub translation_latency_p50_ms: u64,
    pub translation_latency_p95_ms: u64,
    pub uploads_total: usize,
    pub upload_bytes_total: u64,
    pub sessions_open: usize,
    pub sessions_created: usize,
    pub sessions_expired: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
