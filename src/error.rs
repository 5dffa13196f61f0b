use thiserror::Error;

/// Why the upstream filter rejected an image with a 4xx.
///
/// A 400 body is inspected for a `reason`/`message`/`detail`/`error` field
/// and reclassified by keyword so the presentation layer can show a specific
/// message instead of a raw HTTP error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The filter saw an animal face ("animal" keyword match).
    AnimalDetected,
    /// No valid human face in the frame ("face" keyword match).
    NoFaceDetected,
    /// Anything else the upstream refused to process.
    InvalidImage,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::AnimalDetected => write!(f, "animal_detected"),
            RejectionKind::NoFaceDetected => write!(f, "no_face_detected"),
            RejectionKind::InvalidImage => write!(f, "invalid_image"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pre-flight validation failed; the request was never sent.
    #[error("Invalid image: {0}")]
    Invalid(String),

    /// Upstream answered 4xx. Terminal, never retried.
    #[error("{message}")]
    Rejected {
        kind: RejectionKind,
        message: String,
    },

    /// Upstream kept answering 5xx or timing out until retries ran out.
    #[error("Screening service unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// No response at all and nothing to retry (e.g. DNS failure).
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered 2xx but the body did not decode as JSON.
    #[error("Malformed upstream response: {0}")]
    Malformed(String),

    /// The direct autism-service call failed. Absorbed by the fallback
    /// path in the orchestrator, never surfaced to the user directly.
    #[error("Autism screening failed: {0}")]
    Screening(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<PipelineError> for String {
    fn from(err: PipelineError) -> Self {
        err.to_string()
    }
}
