//! Goal candidates
//!
//! A candidate is a proposed goal before queue admission. Candidates are
//! created by the generator and never mutated afterwards, except by the
//! optional text enhancer which may rewrite `goal`/`rationale` and must
//! re-derive the signature when it does.

use crate::hash::GoalSignature;
use crate::ids::CandidateId;
use crate::score::GoalPriorityScore;
use crate::records::SuppressionReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin of the signal that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSource {
    Metrics,
    Anomaly,
    Policy,
    Cost,
    Failover,
    Memory,
}

impl GoalSource {
    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Anomaly => "anomaly",
            Self::Policy => "policy",
            Self::Cost => "cost",
            Self::Failover => "failover",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for GoalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the goal tries to achieve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalIntent {
    Stabilize,
    Investigate,
    CostOptimize,
    Recover,
    Custom,
}

impl GoalIntent {
    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stabilize => "stabilize",
            Self::Investigate => "investigate",
            Self::CostOptimize => "cost-optimize",
            Self::Recover => "recover",
            Self::Custom => "custom",
        }
    }

    /// Intents that mutate infrastructure and are blocked in read-only mode
    #[inline]
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::Recover | Self::Stabilize)
    }
}

impl fmt::Display for GoalIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalRisk {
    Low,
    Medium,
    High,
    Critical,
}

impl GoalRisk {
    /// Ordering rank: critical > high > medium > low
    #[inline]
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for GoalRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Candidate,
    Queued,
    Suppressed,
}

/// Evidence recorded by the rule that produced a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CandidateMetadata {
    HighPressure {
        cpu_usage: f64,
        tx_pool_pending: u64,
        active_anomalies: u32,
        critical_anomalies: u32,
    },
    FailoverRecent {
        recent_count: u32,
    },
    CostOptimizable {
        avg_vcpu: f64,
        avg_utilization: f64,
        data_point_count: u32,
    },
    RecurrentIncidents {
        recent_incident_count: u32,
        recent_high_severity_count: u32,
    },
    AutoscalingDisabled {
        cpu_usage: f64,
        active_anomalies: u32,
    },
    Baseline,
}

/// A proposed goal before admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousGoalCandidate {
    pub id: CandidateId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: GoalSource,
    pub status: CandidateStatus,
    pub goal: String,
    pub intent: GoalIntent,
    pub risk: GoalRisk,
    /// Confidence in [0.05, 0.99], two decimals
    pub confidence: f64,
    pub signature: GoalSignature,
    pub rationale: String,
    pub signal_snapshot_id: String,
    pub score: Option<GoalPriorityScore>,
    pub suppression_reason_code: Option<SuppressionReason>,
    pub metadata: Option<CandidateMetadata>,
}

impl AutonomousGoalCandidate {
    /// Last time the candidate was touched (falls back to creation time)
    #[inline]
    #[must_use]
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.updated_at.max(self.created_at)
    }

    /// Rewrite goal/rationale text and re-derive the signature
    ///
    /// This is the only mutation allowed after creation. Intent, risk,
    /// confidence and source are left untouched.
    pub fn rephrase(
        &mut self,
        chain_type: &str,
        goal: impl Into<String>,
        rationale: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.goal = goal.into();
        self.rationale = rationale.into();
        self.signature = GoalSignature::compute(chain_type, self.source, self.intent, &self.goal);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> AutonomousGoalCandidate {
        let now = Utc::now();
        AutonomousGoalCandidate {
            id: CandidateId::new(),
            created_at: now,
            updated_at: now,
            source: GoalSource::Metrics,
            status: CandidateStatus::Candidate,
            goal: "Stabilize sequencer".into(),
            intent: GoalIntent::Stabilize,
            risk: GoalRisk::High,
            confidence: 0.8,
            signature: GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "Stabilize sequencer"),
            rationale: "cpu high".into(),
            signal_snapshot_id: "snap".into(),
            score: None,
            suppression_reason_code: None,
            metadata: None,
        }
    }

    #[test]
    fn risk_rank_orders_critical_first() {
        assert!(GoalRisk::Critical.rank() > GoalRisk::High.rank());
        assert!(GoalRisk::High.rank() > GoalRisk::Medium.rank());
        assert!(GoalRisk::Medium.rank() > GoalRisk::Low.rank());
    }

    #[test]
    fn intent_serializes_kebab_case() {
        let json = serde_json::to_string(&GoalIntent::CostOptimize).unwrap();
        assert_eq!(json, "\"cost-optimize\"");
    }

    #[test]
    fn rephrase_recomputes_signature_only_for_text() {
        let mut c = candidate();
        let before = c.signature.clone();
        c.rephrase("optimism", "Relieve sequencer CPU pressure", "new text", Utc::now());

        assert_ne!(c.signature, before);
        assert_eq!(c.intent, GoalIntent::Stabilize);
        assert_eq!(c.risk, GoalRisk::High);
        assert_eq!(c.confidence, 0.8);
        assert_eq!(
            c.signature,
            GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "relieve sequencer cpu pressure")
        );
    }

    #[test]
    fn metadata_is_tagged_by_rule() {
        let meta = CandidateMetadata::FailoverRecent { recent_count: 2 };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["rule"], "failover_recent");
        assert_eq!(json["recent_count"], 2);
    }
}
