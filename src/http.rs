//! Outbound HTTP: multipart upload, response bucketing, bounded retry.
//!
//! The transport is a trait so the retry and classification logic can be
//! unit-tested against scripted responses without a live endpoint or real
//! twelve-second delays.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RejectionKind};
use crate::request::AnalysisRequest;

/// Status code and raw body of an upstream reply, before any interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

/// Network-level failure, before any HTTP status exists.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No reply within the per-call deadline. Retryable.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// TCP/TLS connection could not be established. Retryable.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Anything else (DNS failure, malformed request). Not retryable.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

/// Seam between the pipeline logic and the wire.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Multipart-upload the image under the field name `file`.
    async fn post_image(
        &self,
        url: &str,
        request: &AnalysisRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;

    /// Plain GET, used by the health probes.
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse, TransportError>;
}

/// Production transport over reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent("kidscreen/0.1")
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn map_error(e: reqwest::Error, timeout: Duration) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

impl Transport for ReqwestTransport {
    async fn post_image(
        &self,
        url: &str,
        request: &AnalysisRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let mime = request
            .effective_mime()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        // The form is rebuilt per attempt; multipart bodies are not reusable.
        let part = reqwest::multipart::Part::bytes(request.bytes.clone())
            .file_name(request.filename.clone())
            .mime_str(&mime)
            .map_err(|e| TransportError::Other(format!("Invalid MIME type '{}': {}", mime, e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;
        Ok(RawResponse { status, body })
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;
        Ok(RawResponse { status, body })
    }
}

/// HTTP client for the screening pipeline: validates before sending, buckets
/// responses into success / terminal rejection / retryable failure, and
/// retries transient failures with a fixed delay.
#[derive(Debug, Clone)]
pub struct ScreeningClient<T: Transport> {
    config: PipelineConfig,
    transport: T,
}

impl ScreeningClient<ReqwestTransport> {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            config,
            transport: ReqwestTransport::new()?,
        })
    }
}

impl<T: Transport> ScreeningClient<T> {
    pub fn with_transport(config: PipelineConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Submit the image to the filter/age pipeline endpoint.
    ///
    /// 2xx returns the decoded JSON body. 4xx is terminal and never retried;
    /// a 400 is reclassified by keyword into a [`RejectionKind`]. 5xx and
    /// network timeouts are retried up to `max_retries` more times with
    /// `retry_delay` between attempts, then surface as `Unavailable`.
    pub async fn submit(
        &self,
        request: &AnalysisRequest,
        endpoint: &str,
    ) -> Result<Value, PipelineError> {
        request.validate(&self.config)?;

        let timeout = self.config.timeout();
        let max_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!(
                    "Retrying pipeline call (attempt {}/{}) after {:?} delay",
                    attempt,
                    max_attempts,
                    self.config.retry_delay()
                );
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            match self.transport.post_image(endpoint, request, timeout).await {
                Ok(response) if response.is_success() => {
                    return parse_json_body(&response.body);
                }
                Ok(response) if response.is_client_error() => {
                    return Err(classify_rejection(&response));
                }
                Ok(response) => {
                    // 5xx (or anything outside 2xx/4xx): transient upstream
                    // failure, typically a cold-starting service.
                    last_error = format!("HTTP {} from upstream", response.status);
                    warn!(
                        "Pipeline call attempt {}/{} failed: {}",
                        attempt, max_attempts, last_error
                    );
                }
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    warn!(
                        "Pipeline call attempt {}/{} failed: {}",
                        attempt, max_attempts, last_error
                    );
                }
                Err(e) => {
                    return Err(PipelineError::Network(e.to_string()));
                }
            }
        }

        Err(PipelineError::Unavailable {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Single-attempt call to the autism-screening endpoint. No retry; its
    /// failure feeds the orchestrator's fallback path instead.
    pub async fn submit_once(
        &self,
        request: &AnalysisRequest,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Value, PipelineError> {
        match self.transport.post_image(endpoint, request, timeout).await {
            Ok(response) if response.is_success() => parse_json_body(&response.body)
                .map_err(|e| PipelineError::Screening(e.to_string())),
            Ok(response) => Err(PipelineError::Screening(format!(
                "HTTP {} from autism service",
                response.status
            ))),
            Err(e) => Err(PipelineError::Screening(e.to_string())),
        }
    }
}

fn parse_json_body(body: &str) -> Result<Value, PipelineError> {
    serde_json::from_str(body)
        .map_err(|e| PipelineError::Malformed(format!("Invalid JSON in upstream response: {}", e)))
}

/// Turn a terminal 4xx into a semantically labeled rejection.
///
/// A 400 body carries the filter's refusal in one of several field names
/// depending on backend version; the first present wins. Keyword matching is
/// a case-insensitive substring test.
fn classify_rejection(response: &RawResponse) -> PipelineError {
    if response.status != 400 {
        return PipelineError::Rejected {
            kind: RejectionKind::InvalidImage,
            message: format!("Upstream rejected the request with HTTP {}", response.status),
        };
    }

    let reason = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| {
            ["reason", "message", "detail", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(String::from))
        })
        .unwrap_or_else(|| "The image could not be processed.".to_string());

    let lowered = reason.to_lowercase();
    let kind = if lowered.contains("animal") {
        RejectionKind::AnimalDetected
    } else if lowered.contains("face") {
        RejectionKind::NoFaceDetected
    } else {
        RejectionKind::InvalidImage
    };

    PipelineError::Rejected {
        kind,
        message: reason,
    }
}
