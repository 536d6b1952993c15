//! Configuration module

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpListener;

/// Run-id file name, looked up at the crate root by default.
pub const RUN_ID_FILE_NAME: &str = "best_run_id.txt";

/// Artifact path of the model under its training run.
pub const DEFAULT_ARTIFACT_NAME: &str = "model_rf_100";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the MLflow tracking server
    pub registry_url: String,

    /// File holding the id of the run to serve
    pub run_id_file: PathBuf,

    /// Artifact path of the model inside the run
    pub artifact_name: String,

    /// Listen host: an IP literal or a resolvable name such as `localhost`
    pub bind_host: String,

    /// Listen port
    pub bind_port: u16,

    /// Explicit input columns (`name[:type],...`), overrides the input example
    pub input_columns: Option<String>,

    /// Number of ONNX sessions in the pool
    pub model_sessions: usize,

    /// Timeout for registry calls, in seconds
    pub registry_timeout_secs: u64,

    /// Timeout for a single prediction, in seconds
    pub predict_timeout_secs: u64,

    /// Maximum request body size
    pub max_body_bytes: usize,

    /// Log output format (text, json)
    pub log_format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            registry_url: env::var("REGISTRY_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),

            run_id_file: env::var("RUN_ID_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_run_id_file()),

            artifact_name: env::var("ARTIFACT_NAME")
                .unwrap_or_else(|_| DEFAULT_ARTIFACT_NAME.to_string()),

            bind_host: env::var("BIND_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),

            bind_port: env::var("BIND_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5001),

            input_columns: env::var("MODEL_INPUT_COLUMNS")
                .ok()
                .filter(|c| !c.trim().is_empty()),

            model_sessions: env::var("MODEL_SESSIONS")
                .ok()
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),

            registry_timeout_secs: env::var("REGISTRY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            predict_timeout_secs: env::var("PREDICT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            max_body_bytes: env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|b| b.parse().ok())
                .unwrap_or(10 * 1024 * 1024),

            log_format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "text".to_string()),
        }
    }

    /// `host:port` as configured, for messages
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Resolve the bind host and listen on the first address that accepts
    pub async fn bind_listener(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind((self.bind_host.as_str(), self.bind_port)).await
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    pub fn predict_timeout(&self) -> Duration {
        Duration::from_secs(self.predict_timeout_secs)
    }

    /// Check if logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Run-id file one level above `src/`, independent of the working directory.
pub fn default_run_id_file() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(RUN_ID_FILE_NAME)
}
