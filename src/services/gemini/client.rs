// Gemini generateContent client
//
// Two call shapes: extraction sends the image inline ahead of a text
// instruction, translation is text only. Both share one retry path where
// throttling (429/503) waits a fixed pause and transport errors back off
// exponentially with jitter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::errors::{ModelError, ModelResult};
use crate::core::types::UploadedImage;
use crate::services::gemini::keys::KeyRing;
use crate::services::gemini::{prompts, ChartModel};
use crate::utils::{Metrics, ModelCallKind};

const GENERATE_URL_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Fixed pause after a 429/503 before the next attempt.
const THROTTLE_PAUSE: Duration = Duration::from_secs(10);

pub struct GeminiClient {
    config: Arc<Config>,
    keys: Arc<KeyRing>,
    http: reqwest::Client,
    metrics: Option<Metrics>,
}

#[derive(Debug)]
struct ModelReply {
    text: String,
    input_tokens: u64,
    output_tokens: u64,
}

impl GeminiClient {
    pub fn new(
        config: Arc<Config>,
        keys: Arc<KeyRing>,
        metrics: Option<Metrics>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            keys,
            http,
            metrics,
        })
    }

    async fn generate(
        &self,
        kind: ModelCallKind,
        model: &str,
        body: &serde_json::Value,
    ) -> ModelResult<ModelReply> {
        let (key_index, api_key) =
            self.keys.acquire().await.ok_or(ModelError::NoApiKey)?;
        let url = format!("{}/{}:generateContent?key={}", GENERATE_URL_BASE, model, api_key);

        let started = Instant::now();
        let outcome = self.send_with_retries(&url, body).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(raw) => {
                self.keys.record_success(key_index).await;
                let reply = parse_reply(&raw);
                if let Some(metrics) = &self.metrics {
                    match &reply {
                        Ok(r) => metrics.record_model_call(
                            kind,
                            true,
                            elapsed,
                            r.input_tokens,
                            r.output_tokens,
                        ),
                        Err(_) => metrics.record_model_call(kind, false, elapsed, 0, 0),
                    }
                }
                reply
            }
            Err(err) => {
                self.keys.record_failure(key_index).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_model_call(kind, false, elapsed, 0, 0);
                }
                Err(err)
            }
        }
    }

    async fn send_with_retries(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> ModelResult<String> {
        let max_retries = self.config.max_retries();
        let mut attempt: u32 = 0;
        loop {
            match self
                .http
                .post(url)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.text().await?);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let detail = response.text().await.unwrap_or_default();
                    let err = ModelError::Upstream {
                        status,
                        body: detail,
                    };
                    // Only throttling is worth another attempt; a 400 will
                    // not get better by resending the same payload.
                    if !err.is_throttled() {
                        return Err(err);
                    }
                    if attempt >= max_retries {
                        return Err(ModelError::AttemptsExhausted {
                            attempts: attempt + 1,
                            last_status: status,
                        });
                    }
                    warn!(
                        "Model returned {} on attempt {}/{}, pausing {}s",
                        status,
                        attempt + 1,
                        max_retries + 1,
                        THROTTLE_PAUSE.as_secs()
                    );
                    tokio::time::sleep(THROTTLE_PAUSE).await;
                }
                Err(err) => {
                    if attempt >= max_retries {
                        return Err(ModelError::Transport(err));
                    }
                    debug!(
                        "Request error on attempt {}/{}: {}",
                        attempt + 1,
                        max_retries + 1,
                        err
                    );
                    tokio::time::sleep(backoff_with_jitter(attempt)).await;
                }
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl ChartModel for GeminiClient {
    async fn extract_chart(&self, image: &UploadedImage) -> ModelResult<String> {
        debug!(
            "Extraction call for '{}' ({} bytes)",
            image.filename,
            image.size_bytes()
        );
        let body = extraction_body(image);
        let reply = self
            .generate(ModelCallKind::Extraction, self.config.extraction_model(), &body)
            .await?;
        Ok(reply.text)
    }

    async fn translate_chart(&self, extracted: &str) -> ModelResult<String> {
        debug!("Translation call ({} chars in)", extracted.chars().count());
        let body = translation_body(extracted);
        let reply = self
            .generate(ModelCallKind::Translation, self.config.translation_model(), &body)
            .await?;
        Ok(reply.text)
    }
}

/// The image goes first, instruction second, matching the order the model
/// was prompted with during prompt tuning.
fn extraction_body(image: &UploadedImage) -> serde_json::Value {
    let encoded = general_purpose::STANDARD.encode(image.bytes.as_slice());
    serde_json::json!({
        "contents": [{
            "parts": [
                {
                    "inline_data": {
                        "mime_type": image.mime_type,
                        "data": encoded
                    }
                },
                { "text": prompts::extraction_prompt() }
            ]
        }]
    })
}

fn translation_body(extracted: &str) -> serde_json::Value {
    serde_json::json!({
        "contents": [{
            "parts": [
                { "text": prompts::translation_prompt(extracted) }
            ]
        }]
    })
}

fn parse_reply(raw: &str) -> ModelResult<ModelReply> {
    let response: serde_json::Value = serde_json::from_str(raw)?;
    let text = response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or(ModelError::MissingText)?
        .to_string();
    let usage = &response["usageMetadata"];
    Ok(ModelReply {
        text,
        input_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0),
        output_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0),
    })
}

/// Exponential backoff with up to a second of jitter.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = 2_u64.pow(attempt);
    let jitter = rand::random::<u64>() % 1000;
    Duration::from_millis(base * 1000 + jitter)
}
