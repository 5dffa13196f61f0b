//! Client-side orchestration for the face/age/autism photo-screening
//! pipeline.
//!
//! The heavy lifting all happens in externally hosted services; this crate
//! owns the part the client has to get right: sequencing the calls,
//! retrying transient failures, normalizing inconsistent response shapes,
//! reconstructing annotated-image URLs, and reducing everything to one
//! immutable [`AnalysisOutcome`] for the presentation layer to render.

pub mod confidence;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod pipeline;
pub mod request;
pub mod resolve;

pub use confidence::{ConfidenceBands, ConfidenceLevel};
pub use config::PipelineConfig;
pub use error::{PipelineError, RejectionKind};
pub use http::{RawResponse, ReqwestTransport, ScreeningClient, Transport, TransportError};
pub use pipeline::types::{
    AgeAnnotation, AgeSummary, AnalysisOutcome, AnalysisState, RegionFinding, ScoredFinding,
};
pub use pipeline::{Orchestrator, PipelineRun};
pub use request::AnalysisRequest;
pub use resolve::ImageUrlResolver;
