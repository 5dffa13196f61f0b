//! Pipeline configuration.
//!
//! Everything the orchestrator and HTTP client need is an explicitly
//! constructed value passed in at build time, so tests can inject tiny
//! timeouts and mock hosts instead of patching globals.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;

/// Upload size ceiling: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Per-call timeout for the filter/age pipeline endpoint. Generous because
/// the upstream runs on serverless hosts with multi-minute cold starts.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Shorter timeout for the direct autism-service call, which has no retry.
pub const DEFAULT_AUTISM_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 12_000;

/// Image types the upstream filter accepts.
pub const ALLOWED_MIME_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL of the face-filter gateway (exposes `/filter_face/`).
    pub face_base_url: String,
    /// Base URL of the age-classification service (serves `/annotated_age/`).
    pub age_base_url: String,
    /// Base URL of the autism-screening service (exposes `/predict/`,
    /// serves `/annotated/`).
    pub autism_base_url: String,
    /// Fallback host for annotated-image paths that match no known prefix.
    pub default_base_url: String,

    pub max_upload_bytes: usize,
    pub allowed_mime_types: Vec<String>,

    pub timeout_ms: u64,
    pub autism_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,

    /// Post-scaling confidence threshold for the HIGH bucket.
    pub high_confidence: f64,
    /// Post-scaling confidence threshold for the MEDIUM bucket.
    pub medium_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            face_base_url: "http://localhost:8000".to_string(),
            age_base_url: "http://localhost:8001".to_string(),
            autism_base_url: "http://localhost:8002".to_string(),
            default_base_url: "http://localhost:8000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_mime_types: ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            autism_timeout_ms: DEFAULT_AUTISM_TIMEOUT_MS,
            health_timeout_ms: 10_000,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            high_confidence: 70.0,
            medium_confidence: 40.0,
        }
    }
}

impl PipelineConfig {
    /// Parse a config from TOML text. Missing keys fall back to defaults,
    /// so a deployment file only has to name the hosts it overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Load a config from a TOML file on disk.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn autism_timeout(&self) -> Duration {
        Duration::from_millis(self.autism_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Endpoint for the initial filter/age pipeline call.
    pub fn filter_endpoint(&self) -> String {
        join_url(&self.face_base_url, "/filter_face/")
    }

    /// Endpoint for the direct autism-screening call.
    pub fn autism_endpoint(&self) -> String {
        join_url(&self.autism_base_url, "/predict/")
    }
}

/// Join a base URL and a path with exactly one slash at the boundary.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
