//! Priority score
//!
//! Four bounded sub-scores summed into a total in [0, 100]. Computed once at
//! enqueue time and never recomputed for an item already in the queue.

use serde::{Deserialize, Serialize};

/// Bounded admission score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalPriorityScore {
    /// Impact in [0, 40]
    pub impact: f64,
    /// Urgency in [0, 25]
    pub urgency: f64,
    /// Confidence in [0, 20]
    pub confidence: f64,
    /// Policy fit in [0, 15]
    pub policy_fit: f64,
    /// Sum of the four sub-scores
    pub total: f64,
}

impl GoalPriorityScore {
    pub const IMPACT_MAX: f64 = 40.0;
    pub const URGENCY_MAX: f64 = 25.0;
    pub const CONFIDENCE_MAX: f64 = 20.0;
    pub const POLICY_FIT_MAX: f64 = 15.0;

    /// Build a score, clamping each component into its range
    ///
    /// Components are rounded to two decimals before summing so that
    /// `total == impact + urgency + confidence + policy_fit` holds exactly
    /// for the stored values.
    #[must_use]
    pub fn new(impact: f64, urgency: f64, confidence: f64, policy_fit: f64) -> Self {
        let impact = bounded(impact, Self::IMPACT_MAX);
        let urgency = bounded(urgency, Self::URGENCY_MAX);
        let confidence = bounded(confidence, Self::CONFIDENCE_MAX);
        let policy_fit = bounded(policy_fit, Self::POLICY_FIT_MAX);
        Self {
            impact,
            urgency,
            confidence,
            policy_fit,
            total: impact + urgency + confidence + policy_fit,
        }
    }
}

fn bounded(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    (value.clamp(0.0, max) * 100.0).round() / 100.0
}
