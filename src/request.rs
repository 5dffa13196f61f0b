//! The user-selected image payload and its pre-flight validation.

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// An image the user picked or captured, plus its metadata. Immutable once
/// built; a new selection replaces it wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    /// Raw image bytes as read from the picker/camera.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// MIME type as declared by the picker, if any.
    pub mime_type: Option<String>,
    pub filename: String,
}

impl AnalysisRequest {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: None,
            filename: filename.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    /// The MIME type to upload with: the declared one if present, otherwise
    /// inferred from the magic bytes. None when neither works.
    pub fn effective_mime(&self) -> Option<String> {
        if let Some(ref declared) = self.mime_type {
            return Some(declared.clone());
        }
        image::guess_format(&self.bytes)
            .ok()
            .map(|format| format.to_mime_type().to_string())
    }

    /// Pre-flight validation. A failure here means the request is never sent.
    pub fn validate(&self, config: &PipelineConfig) -> Result<(), PipelineError> {
        if self.bytes.is_empty() {
            return Err(PipelineError::Invalid("image payload is empty".to_string()));
        }
        if self.bytes.len() > config.max_upload_bytes {
            return Err(PipelineError::Invalid(format!(
                "image is {} bytes, above the {} byte limit",
                self.bytes.len(),
                config.max_upload_bytes
            )));
        }
        let mime = self.effective_mime().ok_or_else(|| {
            PipelineError::Invalid(
                "could not determine the image type from metadata or content".to_string(),
            )
        })?;
        if !config.allowed_mime_types.iter().any(|m| m == &mime) {
            return Err(PipelineError::Invalid(format!(
                "unsupported image type '{}', expected one of: {}",
                mime,
                config.allowed_mime_types.join(", ")
            )));
        }
        Ok(())
    }
}
