use crate::core::errors::ConfigError;
use std::env;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Gemini API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_keys: Vec<String>,
    pub extraction_model: String,
    pub translation_model: String,
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

/// Session lifecycle configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_seconds: u64,
}

/// Request limits
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_upload_bytes: usize,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub limits: LimitsConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        // Comma-separated key list; GOOGLE_API_KEY is accepted as a
        // single-key fallback.
        let api_keys: Vec<String> = env::var("GEMINI_API_KEYS")
            .or_else(|_| env::var("GOOGLE_API_KEY"))
            .ok()
            .map(|keys| {
                keys.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let extraction_model =
            env::var("EXTRACTION_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());
        // Translation follows the extraction model unless overridden.
        let translation_model =
            env::var("TRANSLATION_MODEL").unwrap_or_else(|_| extraction_model.clone());

        Ok(Self {
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8080),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            api: ApiConfig {
                api_keys,
                extraction_model,
                translation_model,
                max_retries: env::var("MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
                timeout_seconds: env::var("API_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            },
            session: SessionConfig {
                ttl_seconds: env::var("SESSION_TTL_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            },
            limits: LimitsConfig {
                max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(20 * 1024 * 1024),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_keys.is_empty() {
            return Err(ConfigError::NoApiKeys);
        }

        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::InvalidTimeout(self.api.timeout_seconds));
        }

        if self.session.ttl_seconds == 0 {
            return Err(ConfigError::InvalidSessionTtl(self.session.ttl_seconds));
        }

        if self.limits.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidBodyLimit(self.limits.max_upload_bytes));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn api_keys(&self) -> &[String] {
        &self.api.api_keys
    }

    pub fn extraction_model(&self) -> &str {
        &self.api.extraction_model
    }

    pub fn translation_model(&self) -> &str {
        &self.api.translation_model
    }

    pub fn max_retries(&self) -> u32 {
        self.api.max_retries
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_seconds)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.limits.max_upload_bytes
    }
}

// Note: No Default implementation because Config::new() can fail
// Users should explicitly call Config::new()? and handle errors
