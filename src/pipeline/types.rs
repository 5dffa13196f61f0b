//! Result records surfaced to the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::confidence::ConfidenceLevel;

/// One detected face with its predicted age bucket.
#[derive(Debug, Clone, Serialize)]
pub struct AgeAnnotation {
    /// Age bucket as reported, e.g. "(4-6)". Stringified even when the
    /// backend sent a bare number.
    pub age: String,
    /// Detection box [x1, y1, x2, y2] when provided.
    pub bounding_box: Option<Vec<i64>>,
}

/// Normalized age-check summary.
///
/// Invariant: when `has_faces` is true, `kids_count + adults_count` equals
/// the number of detected faces.
#[derive(Debug, Clone, Serialize)]
pub struct AgeSummary {
    pub has_faces: bool,
    pub kids_count: u32,
    pub adults_count: u32,
    pub annotations: Vec<AgeAnnotation>,
    /// Service-relative path of the age-annotated image, unresolved.
    pub annotated_image_path: Option<String>,
}

impl AgeSummary {
    pub fn face_count(&self) -> u32 {
        self.kids_count + self.adults_count
    }
}

/// One per-region screening score, raw scale as received.
#[derive(Debug, Clone, Serialize)]
pub struct RegionFinding {
    pub region: String,
    pub label: String,
    pub confidence: f64,
}

/// A region finding after confidence bucketing.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFinding {
    pub region: String,
    pub label: String,
    pub confidence: f64,
    pub level: ConfidenceLevel,
}

/// Orchestration state. The last five variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Idle,
    Processing,
    ProcessingAutism,
    ChildAutismScreened,
    AutismFailed,
    AdultInvalid,
    UnclearAge,
    Error,
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisState::ChildAutismScreened
                | AnalysisState::AutismFailed
                | AnalysisState::AdultInvalid
                | AnalysisState::UnclearAge
                | AnalysisState::Error
        )
    }

    /// True while a request is in flight; the UI must block the analyze
    /// trigger in these states.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AnalysisState::Processing | AnalysisState::ProcessingAutism
        )
    }
}

/// The final immutable record of one orchestration run. Replaced wholesale
/// on each new run; never mutated incrementally.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub state: AnalysisState,
    /// Single user-facing message for this outcome.
    pub message: String,
    pub age_summary: Option<AgeSummary>,
    pub findings: Vec<ScoredFinding>,
    pub final_decision: Option<String>,
    /// Absolute URL of the age-annotated image, if any.
    pub annotated_age_url: Option<String>,
    /// Absolute URL of the autism-annotated image, if any.
    pub autism_annotated_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl AnalysisOutcome {
    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            state: AnalysisState::Error,
            message: message.into(),
            age_summary: None,
            findings: Vec::new(),
            final_decision: None,
            annotated_age_url: None,
            autism_annotated_url: None,
            completed_at: Utc::now(),
        }
    }
}
