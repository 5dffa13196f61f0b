//! Shape-tolerant normalization of pipeline responses.
//!
//! The filter gateway wraps the age service's body under `age_analysis_data`,
//! and newer age-service versions nest their own `age_analysis_data` inside
//! that, so `age_check_summary` shows up at two different depths depending on
//! which backend snapshot answered. Extraction is an ordered list of probes
//! (deepest shape first) rather than nested conditionals, so each shape can
//! be tested on its own. Absent or malformed fields become None, never a
//! panic.

use serde_json::Value;
use tracing::debug;

use super::types::{AgeAnnotation, AgeSummary, RegionFinding};

/// Canonical view of one raw pipeline response. Paths are unresolved,
/// exactly as the source gave them.
#[derive(Debug, Clone, Default)]
pub struct NormalizedResponse {
    /// Top-level status flag, e.g. "face_validated_and_processed".
    pub status: Option<String>,
    /// Top-level `valid` boolean from the face filter.
    pub valid: Option<bool>,
    pub age_summary: Option<AgeSummary>,
    /// Autism findings embedded in the pipeline response, if the gateway
    /// already ran the screening server-side.
    pub findings: Vec<RegionFinding>,
    pub final_decision: Option<String>,
    pub annotated_age_path: Option<String>,
    pub autism_annotated_path: Option<String>,
}

/// Ordered probes for the container that holds `age_check_summary` and
/// (optionally) `autism_prediction_data`. Deeper shape first.
fn age_container(body: &Value) -> Option<&Value> {
    fn deep(v: &Value) -> Option<&Value> {
        v.get("age_analysis_data")?.get("age_analysis_data")
    }
    fn shallow(v: &Value) -> Option<&Value> {
        v.get("age_analysis_data")
    }
    let probes: [fn(&Value) -> Option<&Value>; 2] = [deep, shallow];
    probes
        .iter()
        .filter_map(|probe| probe(body))
        .find(|container| container.get("age_check_summary").is_some())
}

pub fn normalize(body: &Value) -> NormalizedResponse {
    let mut normalized = NormalizedResponse {
        status: body.get("status").and_then(|v| v.as_str()).map(String::from),
        valid: body.get("valid").and_then(|v| v.as_bool()),
        ..Default::default()
    };

    let container = match age_container(body) {
        Some(c) => c,
        None => {
            debug!("No age_check_summary at any known depth");
            // A top-level annotated URL still counts as the fallback age URL
            normalized.annotated_age_path = string_field(body, "annotated_image_url");
            return normalized;
        }
    };

    if let Some(summary) = container.get("age_check_summary") {
        normalized.age_summary = Some(parse_age_summary(summary));
        normalized.annotated_age_path = string_field(summary, "annotated_image_url");
    }

    if let Some(autism) = container.get("autism_prediction_data") {
        let (findings, final_decision) = parse_autism_results(autism.get("results"));
        normalized.findings = findings;
        normalized.final_decision = final_decision;
        normalized.autism_annotated_path = string_field(autism, "annotated_image_path");
    }

    // Top-level URL is the fallback only when the summary carried none
    if normalized.annotated_age_path.is_none() {
        normalized.annotated_age_path = string_field(body, "annotated_image_url");
    }

    normalized
}

fn parse_age_summary(summary: &Value) -> AgeSummary {
    let annotations = summary
        .get("annotations")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(parse_annotation).collect())
        .unwrap_or_default();

    AgeSummary {
        has_faces: summary.get("has_faces").and_then(|v| v.as_bool()).unwrap_or(false),
        kids_count: count_field(summary, "kids_count"),
        adults_count: count_field(summary, "adults_count"),
        annotations,
        annotated_image_path: string_field(summary, "annotated_image_url"),
    }
}

fn parse_annotation(item: &Value) -> Option<AgeAnnotation> {
    // `age` arrives as a string bucket or a bare number depending on backend
    let age = match item.get("age")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let bounding_box = item
        .get("box")
        .and_then(|v| v.as_array())
        .map(|coords| coords.iter().filter_map(|c| c.as_i64()).collect());
    Some(AgeAnnotation { age, bounding_box })
}

/// Split an autism `results` array into per-region findings and the optional
/// terminal `final_decision` entry.
pub fn parse_autism_results(results: Option<&Value>) -> (Vec<RegionFinding>, Option<String>) {
    let items = match results.and_then(|v| v.as_array()) {
        Some(items) => items,
        None => return (Vec::new(), None),
    };

    let mut findings = Vec::new();
    let mut final_decision = None;
    for item in items {
        if let Some(decision) = item.get("final_decision").and_then(|v| v.as_str()) {
            final_decision = Some(decision.to_string());
            continue;
        }
        let (region, label) = match (
            item.get("region").and_then(|v| v.as_str()),
            item.get("label").and_then(|v| v.as_str()),
        ) {
            (Some(region), Some(label)) => (region.to_string(), label.to_string()),
            _ => continue,
        };
        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NAN);
        findings.push(RegionFinding {
            region,
            label,
            confidence,
        });
    }
    (findings, final_decision)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn count_field(value: &Value, key: &str) -> u32 {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32
}
