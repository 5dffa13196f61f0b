//! Confidence bucketing for per-region screening scores.

use serde::Serialize;

use crate::config::PipelineConfig;

/// Discrete severity bucket shown next to each region finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Post-scaling thresholds for the HIGH and MEDIUM buckets.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceBands {
    pub high: f64,
    pub medium: f64,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self {
            high: 70.0,
            medium: 40.0,
        }
    }
}

impl ConfidenceBands {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            high: config.high_confidence,
            medium: config.medium_confidence,
        }
    }

    /// Map a raw confidence to a bucket.
    ///
    /// Upstream backends disagree on scale: some report fractions (0-1),
    /// others percentages (0-100). Values strictly above 1 are taken as
    /// percentages; everything else is multiplied by 100, so exactly 1.0
    /// reads as a full-confidence fraction. Non-finite input is Low.
    pub fn classify(&self, confidence: f64) -> ConfidenceLevel {
        if !confidence.is_finite() {
            return ConfidenceLevel::Low;
        }
        let percent = if confidence > 1.0 {
            confidence
        } else {
            confidence * 100.0
        };
        if percent >= self.high {
            ConfidenceLevel::High
        } else if percent >= self.medium {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}
