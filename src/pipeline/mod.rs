//! The orchestration state machine.
//!
//! One run: submit the image to the filter/age gateway, normalize whatever
//! shape came back, then branch. Children pass the face-validation gate and
//! get a direct autism-screening call; adults-only images are terminal
//! without ever touching the autism service; anything unclear lands in
//! `unclear_age`. The direct call has no retry; if it fails or comes back
//! empty, any autism results already embedded in the pipeline response are
//! used instead, and only when those are missing too does the run end in
//! `autism_failed`.
//!
//! A run can be driven in one shot with [`Orchestrator::analyze`], or in
//! phases (`begin`, [`PipelineRun::execute`], `apply`) when the caller wants
//! the network work on its own task. The generation token handed out by
//! `begin` is checked in `apply`, so a run that finishes after a reset or a
//! newer run is discarded instead of resurfacing.

pub mod normalize;
pub mod types;

use tracing::{info, warn};

use crate::confidence::ConfidenceBands;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::http::{ReqwestTransport, ScreeningClient, Transport};
use crate::request::AnalysisRequest;
use crate::resolve::ImageUrlResolver;

use self::normalize::{normalize, parse_autism_results, NormalizedResponse};
use self::types::{AnalysisOutcome, AnalysisState, RegionFinding, ScoredFinding};

/// Status sentinel the gateway sets once the face filter has passed and the
/// age service has answered.
const STATUS_VALIDATED: &str = "face_validated_and_processed";

pub struct Orchestrator<T: Transport> {
    client: ScreeningClient<T>,
    resolver: ImageUrlResolver,
    bands: ConfidenceBands,
    selected: Option<AnalysisRequest>,
    state: AnalysisState,
    outcome: Option<AnalysisOutcome>,
    /// Bumped by `begin` and `reset`; `apply` installs an outcome only when
    /// its token still matches, so a run that finished after a reset or a
    /// newer run is discarded instead of resurfacing.
    generation: u64,
}

impl Orchestrator<ReqwestTransport> {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = ScreeningClient::new(config)?;
        Ok(Self::from_client(client))
    }
}

impl<T: Transport> Orchestrator<T> {
    pub fn with_transport(config: PipelineConfig, transport: T) -> Self {
        Self::from_client(ScreeningClient::with_transport(config, transport))
    }

    fn from_client(client: ScreeningClient<T>) -> Self {
        let resolver = ImageUrlResolver::from_config(client.config());
        let bands = ConfidenceBands::from_config(client.config());
        Self {
            client,
            resolver,
            bands,
            selected: None,
            state: AnalysisState::Idle,
            outcome: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn outcome(&self) -> Option<&AnalysisOutcome> {
        self.outcome.as_ref()
    }

    pub fn selected_image(&self) -> Option<&AnalysisRequest> {
        self.selected.as_ref()
    }

    pub fn transport(&self) -> &T {
        self.client.transport()
    }

    /// Replace the selected image. The previous selection and any previous
    /// outcome stay untouched until the next run or reset.
    pub fn select_image(&mut self, request: AnalysisRequest) {
        self.selected = Some(request);
    }

    /// Return to idle from any state, discarding all intermediate data. An
    /// in-flight run keeps going on the wire but `apply` will refuse its
    /// result.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = AnalysisState::Idle;
        self.outcome = None;
        self.selected = None;
        info!("Session reset to idle");
    }

    /// Start a run: bump the generation and transition to `processing`.
    ///
    /// Returns the run's token plus a clone of the selected image, or None
    /// without any transition when no image is selected.
    pub fn begin(&mut self) -> Option<(u64, AnalysisRequest)> {
        let request = match self.selected.clone() {
            Some(request) => request,
            None => {
                warn!("Analyze triggered with no image selected; ignoring");
                return None;
            }
        };
        self.generation += 1;
        self.state = AnalysisState::Processing;
        info!(
            "Starting analysis of '{}' ({} bytes)",
            request.filename,
            request.byte_size()
        );
        Some((self.generation, request))
    }

    /// Borrow the pieces a run needs. The runner never holds the
    /// orchestrator's mutable state, so `reset` and `begin` stay callable
    /// while a detached run is still in flight.
    pub fn runner(&self) -> PipelineRun<'_, T> {
        PipelineRun {
            client: &self.client,
            resolver: &self.resolver,
            bands: &self.bands,
        }
    }

    /// Install a finished run's outcome, but only if `token` still matches
    /// the current generation. A stale run (reset or a newer `begin` since)
    /// is discarded and the current state is left untouched.
    pub fn apply(&mut self, token: u64, outcome: AnalysisOutcome) -> Option<&AnalysisOutcome> {
        if token != self.generation {
            info!("Discarding stale analysis result (session moved on)");
            return None;
        }
        self.state = outcome.state;
        self.outcome = Some(outcome);
        self.outcome.as_ref()
    }

    /// Run one analysis against the selected image, begin to apply.
    ///
    /// Returns None without any state transition when no image is selected.
    /// All failures fold into a terminal outcome; this method itself never
    /// errors.
    pub async fn analyze(&mut self) -> Option<&AnalysisOutcome> {
        let (token, request) = self.begin()?;

        let staged = self.runner().filter_stage(&request).await;
        let outcome = match staged {
            Stage::Settled(outcome) => outcome,
            Stage::ScreeningDue(normalized) => {
                self.state = AnalysisState::ProcessingAutism;
                self.runner().screening_stage(&request, normalized).await
            }
        };
        self.apply(token, outcome)
    }
}

/// A detached pipeline run: borrows the client, resolver, and confidence
/// bands, nothing else.
pub struct PipelineRun<'a, T: Transport> {
    client: &'a ScreeningClient<T>,
    resolver: &'a ImageUrlResolver,
    bands: &'a ConfidenceBands,
}

/// What the filter stage decided: the run settled without screening, or a
/// validated child still needs the autism call.
enum Stage {
    Settled(AnalysisOutcome),
    ScreeningDue(NormalizedResponse),
}

impl<'a, T: Transport> PipelineRun<'a, T> {
    /// Run both stages and return the terminal outcome. Never errors; all
    /// failures fold into an error outcome.
    pub async fn execute(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        match self.filter_stage(request).await {
            Stage::Settled(outcome) => outcome,
            Stage::ScreeningDue(normalized) => self.screening_stage(request, normalized).await,
        }
    }

    async fn filter_stage(&self, request: &AnalysisRequest) -> Stage {
        let endpoint = self.client.config().filter_endpoint();
        let body = match self.client.submit(request, &endpoint).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Pipeline call failed terminally: {}", e);
                return Stage::Settled(AnalysisOutcome::error(user_message(&e)));
            }
        };

        let normalized = normalize(&body);
        let kids = normalized
            .age_summary
            .as_ref()
            .map(|s| s.kids_count)
            .unwrap_or(0);
        let adults = normalized
            .age_summary
            .as_ref()
            .map(|s| s.adults_count)
            .unwrap_or(0);
        let face_validated = normalized.status.as_deref() == Some(STATUS_VALIDATED)
            && normalized.valid == Some(true);

        if kids > 0 && face_validated {
            info!("Child detected ({} kid(s)); invoking autism screening", kids);
            return Stage::ScreeningDue(normalized);
        }

        let annotated_age_url = self
            .resolver
            .resolve_opt(normalized.annotated_age_path.as_deref());

        if adults > 0 {
            info!("Adults only ({}); screening not applicable", adults);
            return Stage::Settled(AnalysisOutcome {
                state: AnalysisState::AdultInvalid,
                message: "Adults detected. Screening only applies to children.".to_string(),
                age_summary: normalized.age_summary,
                findings: Vec::new(),
                final_decision: None,
                annotated_age_url,
                autism_annotated_url: None,
                completed_at: chrono::Utc::now(),
            });
        }

        // Covers both "face not validated" and "age indeterminate"; the two
        // sub-cases differ only in the displayed message, not in state.
        let message = if !face_validated {
            "The face in the image could not be validated.".to_string()
        } else {
            "Could not determine an age from the image.".to_string()
        };
        info!("Unclear age outcome: {}", message);
        Stage::Settled(AnalysisOutcome {
            state: AnalysisState::UnclearAge,
            message,
            age_summary: normalized.age_summary,
            findings: Vec::new(),
            final_decision: None,
            annotated_age_url,
            autism_annotated_url: None,
            completed_at: chrono::Utc::now(),
        })
    }

    async fn screening_stage(
        &self,
        request: &AnalysisRequest,
        normalized: NormalizedResponse,
    ) -> AnalysisOutcome {
        let endpoint = self.client.config().autism_endpoint();
        let timeout = self.client.config().autism_timeout();

        let direct = match self.client.submit_once(request, &endpoint, timeout).await {
            Ok(body) => {
                let (findings, decision) = parse_autism_results(body.get("results"));
                let annotated = body
                    .get("annotated_image_path")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if findings.is_empty() {
                    warn!("Autism service answered with an empty results array");
                    None
                } else {
                    Some((findings, decision, annotated))
                }
            }
            Err(e) => {
                warn!("Direct autism call failed: {}", e);
                None
            }
        };

        // Fall back to results the gateway already embedded in the pipeline
        // response, if the direct call produced nothing usable.
        let (findings, final_decision, autism_path) = match direct {
            Some(result) => result,
            None if !normalized.findings.is_empty() => {
                info!(
                    "Using {} embedded autism finding(s) from the pipeline response",
                    normalized.findings.len()
                );
                (
                    normalized.findings.clone(),
                    normalized.final_decision.clone(),
                    normalized.autism_annotated_path.clone(),
                )
            }
            None => {
                warn!("No autism results from the direct call or the pipeline response");
                return AnalysisOutcome {
                    state: AnalysisState::AutismFailed,
                    message: "Autism screening is currently unavailable for this image."
                        .to_string(),
                    age_summary: normalized.age_summary,
                    findings: Vec::new(),
                    final_decision: None,
                    annotated_age_url: self
                        .resolver
                        .resolve_opt(normalized.annotated_age_path.as_deref()),
                    autism_annotated_url: None,
                    completed_at: chrono::Utc::now(),
                };
            }
        };

        let findings = self.score(findings);
        AnalysisOutcome {
            state: AnalysisState::ChildAutismScreened,
            message: "Child detected. Autism screening completed.".to_string(),
            age_summary: normalized.age_summary,
            findings,
            final_decision,
            annotated_age_url: self
                .resolver
                .resolve_opt(normalized.annotated_age_path.as_deref()),
            autism_annotated_url: self.resolver.resolve_opt(autism_path.as_deref()),
            completed_at: chrono::Utc::now(),
        }
    }

    fn score(&self, findings: Vec<RegionFinding>) -> Vec<ScoredFinding> {
        findings
            .into_iter()
            .map(|f| ScoredFinding {
                level: self.bands.classify(f.confidence),
                region: f.region,
                label: f.label,
                confidence: f.confidence,
            })
            .collect()
    }
}

/// The one user-facing message for a terminal client error. Raw errors never
/// cross to the presentation layer.
fn user_message(error: &PipelineError) -> String {
    match error {
        PipelineError::Rejected { message, .. } => message.clone(),
        PipelineError::Unavailable { .. } => {
            "The screening service is currently unavailable. Please try again in a few minutes."
                .to_string()
        }
        PipelineError::Network(_) => {
            "Could not reach the screening service. Check your connection and try again."
                .to_string()
        }
        PipelineError::Malformed(_) => {
            "The screening service returned an unreadable response. Please try again."
                .to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceLevel;
    use crate::error::RejectionKind;
    use crate::http::testing::{ok, request, status, MockTransport};
    use crate::http::{RawResponse, TransportError};

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.retry_delay_ms = 1;
        config.face_base_url = "http://face.test".to_string();
        config.age_base_url = "http://age.test".to_string();
        config.autism_base_url = "http://autism.test".to_string();
        config.default_base_url = "http://face.test".to_string();
        config
    }

    fn orchestrator(
        steps: Vec<Result<RawResponse, TransportError>>,
    ) -> Orchestrator<MockTransport> {
        let mut o = Orchestrator::with_transport(fast_config(), MockTransport::new(steps));
        o.select_image(request());
        o
    }

    fn validated_child_body() -> String {
        serde_json::json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "age_analysis_data": {
                "age_check_summary": {
                    "has_faces": true,
                    "kids_count": 1,
                    "adults_count": 0,
                    "annotations": [{"age": "(4-6)"}],
                    "annotated_image_url": "/annotated_age/kid.jpg"
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn no_selected_image_means_no_transition() {
        let mut o = Orchestrator::with_transport(fast_config(), MockTransport::new(vec![]));
        assert!(o.analyze().await.is_none());
        assert_eq!(o.state(), AnalysisState::Idle);
        assert_eq!(o.transport().call_count(), 0);
    }

    #[tokio::test]
    async fn validated_child_with_direct_results_is_screened() {
        // Scenario A
        let mut o = orchestrator(vec![
            ok(&validated_child_body()),
            ok(r#"{
                "status": "success",
                "results": [
                    {"region": "eyes", "label": "autistic", "confidence": 81.5},
                    {"final_decision": "autistic"}
                ],
                "annotated_image_path": "/annotated/kid_asd.jpg"
            }"#),
        ]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::ChildAutismScreened);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].level, ConfidenceLevel::High);
        assert_eq!(outcome.final_decision.as_deref(), Some("autistic"));
        assert_eq!(
            outcome.annotated_age_url.as_deref(),
            Some("http://age.test/annotated_age/kid.jpg")
        );
        assert_eq!(
            outcome.autism_annotated_url.as_deref(),
            Some("http://autism.test/annotated/kid_asd.jpg")
        );

        let calls = o.transport().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "http://face.test/filter_face/");
        assert_eq!(calls[1], "http://autism.test/predict/");
    }

    #[tokio::test]
    async fn adults_only_never_calls_the_autism_endpoint() {
        // Scenario B
        let body = serde_json::json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "age_analysis_data": {
                "age_check_summary": {
                    "has_faces": true,
                    "kids_count": 0,
                    "adults_count": 2
                }
            }
        })
        .to_string();
        let mut o = orchestrator(vec![ok(&body)]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::AdultInvalid);
        assert!(outcome.findings.is_empty());

        let calls = o.transport().calls();
        assert_eq!(calls, vec!["http://face.test/filter_face/".to_string()]);
    }

    #[tokio::test]
    async fn rejected_400_surfaces_as_error_with_mapped_message() {
        // Scenario C: terminal error, zero retries
        let mut o = orchestrator(vec![status(
            400,
            r#"{"reason":"animal detected in frame"}"#,
        )]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::Error);
        assert_eq!(outcome.message, "animal detected in frame");
        assert_eq!(o.transport().call_count(), 1);
    }

    #[tokio::test]
    async fn recovers_after_two_503s() {
        // Scenario D
        let mut o = orchestrator(vec![
            status(503, ""),
            status(503, ""),
            ok(&validated_child_body()),
            ok(r#"{"results": [{"region": "nose", "label": "non-autistic", "confidence": 55.0}]}"#),
        ]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::ChildAutismScreened);
        assert_eq!(outcome.findings[0].level, ConfidenceLevel::Medium);
        // Three pipeline attempts plus one autism call
        assert_eq!(o.transport().call_count(), 4);
    }

    #[tokio::test]
    async fn no_faces_at_all_is_unclear_age_without_autism_call() {
        let body = serde_json::json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "age_analysis_data": {
                "age_check_summary": {"has_faces": false, "kids_count": 0, "adults_count": 0}
            }
        })
        .to_string();
        let mut o = orchestrator(vec![ok(&body)]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::UnclearAge);
        assert_eq!(o.transport().call_count(), 1);
    }

    #[tokio::test]
    async fn kids_without_face_validation_stay_unclear() {
        // kids_count > 0 alone is not enough; the gate also needs the
        // validated sentinel and valid=true.
        let body = serde_json::json!({
            "valid": false,
            "status": "age_api_unavailable",
            "age_analysis_data": {
                "age_check_summary": {"has_faces": true, "kids_count": 1, "adults_count": 0}
            }
        })
        .to_string();
        let mut o = orchestrator(vec![ok(&body)]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::UnclearAge);
        assert!(outcome.message.contains("validated"));
        assert_eq!(o.transport().call_count(), 1);
    }

    #[tokio::test]
    async fn failed_direct_call_falls_back_to_embedded_results() {
        let body = serde_json::json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "age_analysis_data": {
                "age_check_summary": {"has_faces": true, "kids_count": 1, "adults_count": 0},
                "autism_prediction_data": {
                    "results": [
                        {"region": "lips", "label": "autistic", "confidence": 0.9},
                        {"final_decision": "autistic"}
                    ],
                    "annotated_image_path": "/annotated/embedded.jpg"
                }
            }
        })
        .to_string();
        let mut o = orchestrator(vec![
            ok(&body),
            Err(TransportError::Timeout(std::time::Duration::from_secs(1))),
        ]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::ChildAutismScreened);
        assert_eq!(outcome.findings.len(), 1);
        // 0.9 is a fraction: scales to 90 -> High
        assert_eq!(outcome.findings[0].level, ConfidenceLevel::High);
        assert_eq!(
            outcome.autism_annotated_url.as_deref(),
            Some("http://autism.test/annotated/embedded.jpg")
        );
    }

    #[tokio::test]
    async fn empty_direct_results_also_fall_back() {
        let body = serde_json::json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "age_analysis_data": {
                "age_check_summary": {"has_faces": true, "kids_count": 1, "adults_count": 0},
                "autism_prediction_data": {
                    "results": [{"region": "eyes", "label": "autistic", "confidence": 75.0}]
                }
            }
        })
        .to_string();
        let mut o = orchestrator(vec![ok(&body), ok(r#"{"results": []}"#)]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::ChildAutismScreened);
        assert_eq!(outcome.findings[0].region, "eyes");
    }

    #[tokio::test]
    async fn no_direct_and_no_embedded_results_is_autism_failed() {
        let mut o = orchestrator(vec![ok(&validated_child_body()), status(500, "boom")]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::AutismFailed);
        assert!(outcome.findings.is_empty());
        // The age summary is still carried for display
        assert!(outcome.age_summary.is_some());
    }

    #[tokio::test]
    async fn unavailable_after_retries_is_an_error_outcome() {
        let mut o = orchestrator(vec![
            status(503, ""),
            status(503, ""),
            status(503, ""),
        ]);
        let outcome = o.analyze().await.unwrap();
        assert_eq!(outcome.state, AnalysisState::Error);
        assert!(outcome.message.contains("unavailable"));
        assert_eq!(o.transport().call_count(), 3);
    }

    #[tokio::test]
    async fn reset_returns_to_idle_and_discards_everything() {
        let mut o = orchestrator(vec![ok(&validated_child_body()), ok(r#"{"results":[]}"#)]);
        let _ = o.analyze().await;
        assert!(o.state().is_terminal());
        o.reset();
        assert_eq!(o.state(), AnalysisState::Idle);
        assert!(o.outcome().is_none());
        assert!(o.selected_image().is_none());
    }

    #[tokio::test]
    async fn reset_between_completion_and_apply_discards_the_run() {
        let mut o = orchestrator(vec![
            ok(&validated_child_body()),
            ok(r#"{"results": [{"region": "eyes", "label": "autistic", "confidence": 80.0}]}"#),
        ]);
        let (token, request) = o.begin().unwrap();
        let outcome = o.runner().execute(&request).await;
        assert_eq!(outcome.state, AnalysisState::ChildAutismScreened);

        // The run finished on the wire, but the session was reset before the
        // result came back.
        o.reset();
        assert!(o.apply(token, outcome).is_none());
        assert_eq!(o.state(), AnalysisState::Idle);
        assert!(o.outcome().is_none());
    }

    #[tokio::test]
    async fn an_older_run_cannot_overwrite_a_newer_one() {
        let mut o = orchestrator(vec![
            ok(&validated_child_body()),
            ok(r#"{"results": [{"region": "eyes", "label": "autistic", "confidence": 80.0}]}"#),
            ok(&validated_child_body()),
            ok(r#"{"results": [{"region": "nose", "label": "non-autistic", "confidence": 10.0}]}"#),
        ]);
        let (old_token, request) = o.begin().unwrap();
        let old_outcome = o.runner().execute(&request).await;

        let (new_token, request) = o.begin().unwrap();
        let new_outcome = o.runner().execute(&request).await;

        assert!(o.apply(old_token, old_outcome).is_none());
        let applied = o.apply(new_token, new_outcome).unwrap();
        assert_eq!(applied.findings[0].region, "nose");
        assert_eq!(o.state(), AnalysisState::ChildAutismScreened);
    }

    #[test]
    fn rejection_kinds_map_to_their_messages() {
        let err = PipelineError::Rejected {
            kind: RejectionKind::NoFaceDetected,
            message: "No valid human face detected.".to_string(),
        };
        assert_eq!(user_message(&err), "No valid human face detected.");
        let err = PipelineError::Unavailable {
            attempts: 3,
            last_error: "HTTP 503".to_string(),
        };
        assert!(user_message(&err).contains("currently unavailable"));
    }
}
