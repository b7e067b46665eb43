use crate::core::errors::ConfigError;
use std::env;
use std::str::FromStr;
use tracing::{warn, Level};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    /// Largest accepted request body, in bytes
    pub max_upload_bytes: usize,
}

/// Segmentation model configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: String,
    /// Square side length the model expects (320 for u2net)
    pub input_size: u32,
    pub inference_backend: Option<String>,
    /// Number of ONNX sessions (controls inference parallelism)
    pub onnx_pool_size: usize,
}

/// Post-processing configuration
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Alpha values strictly above this become opaque, the rest transparent
    pub alpha_threshold: u8,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub processing: ProcessingConfig,
}

/// Read and parse `key`, falling back to `default` when it is unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value, using the default", key, raw);
            default
        }
    }
}

pub(crate) fn parse_log_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn default_pool_size() -> usize {
    // Each u2net session holds ~170 MB; keep the default small
    (num_cpus::get() / 2).clamp(1, 4)
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Self {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| parse_log_level(&s))
            .unwrap_or(Level::INFO);

        Self {
            server: ServerConfig {
                port: env_or("SERVER_PORT", 8501),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
                max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
            },
            model: ModelConfig {
                model_path: env::var("MODEL_PATH")
                    .unwrap_or_else(|_| "models/u2net.onnx".to_string()),
                input_size: env_or("MODEL_INPUT_SIZE", 320),
                inference_backend: env::var("INFERENCE_BACKEND")
                    .ok()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty()),
                onnx_pool_size: env_or("ONNX_POOL_SIZE", default_pool_size()),
            },
            processing: ProcessingConfig {
                alpha_threshold: env_or("ALPHA_THRESHOLD", 200),
            },
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "max_upload_bytes must be > 0".to_string(),
            ));
        }

        if self.model.model_path.trim().is_empty() {
            return Err(ConfigError::InvalidModelConfig(
                "model_path must not be empty".to_string(),
            ));
        }

        if !(64..=2048).contains(&self.model.input_size) {
            return Err(ConfigError::InvalidModelConfig(format!(
                "input_size must be between 64 and 2048, got {}",
                self.model.input_size
            )));
        }

        if self.model.onnx_pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(self.model.onnx_pool_size));
        }

        // 255 would make every pixel transparent
        if self.processing.alpha_threshold == u8::MAX {
            return Err(ConfigError::InvalidAlphaThreshold(
                self.processing.alpha_threshold,
            ));
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

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_bytes
    }

    pub fn model_path(&self) -> &str {
        &self.model.model_path
    }

    pub fn model_input_size(&self) -> u32 {
        self.model.input_size
    }

    pub fn inference_backend(&self) -> Option<&str> {
        self.model.inference_backend.as_deref()
    }

    pub fn onnx_pool_size(&self) -> usize {
        self.model.onnx_pool_size
    }

    pub fn alpha_threshold(&self) -> u8 {
        self.processing.alpha_threshold
    }
}
