//! Candidate generator
//!
//! Turns one [`GoalSignalSnapshot`] into confidence-scored goal proposals.
//! Rules are evaluated independently and every matching rule fires; the
//! baseline review goal is emitted only when nothing else did. Results are
//! deduplicated by signature (first occurrence wins) and capped at
//! `max_candidates`, then optionally rephrased by the [`GoalEnhancer`].

use crate::enhancer::{EnhancementOutcome, GoalEnhancer};
use crate::error::FallbackReason;
use autogoal_types::{
    AutonomousGoalCandidate, CandidateId, CandidateMetadata, CandidateStatus, GoalIntent, GoalRisk,
    GoalSignalSnapshot, GoalSignature, GoalSource, TxPoolTrend,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;

const MIN_CONFIDENCE: f64 = 0.05;
const MAX_CONFIDENCE: f64 = 0.99;

/// Per-call generation options
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub now: DateTime<Utc>,
    pub max_candidates: usize,
    pub llm_enhancer_enabled: bool,
}

impl GenerateOptions {
    #[inline]
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            max_candidates: 5,
            llm_enhancer_enabled: false,
        }
    }
}

/// Generated candidates plus the enhancer verdict
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub candidates: Vec<AutonomousGoalCandidate>,
    /// `None` when the enhancer rewrote the candidates
    pub fallback: Option<FallbackReason>,
}

/// Rule-based goal proposer with optional LLM rephrasing
#[derive(Clone, Default)]
pub struct CandidateGenerator {
    enhancer: Option<Arc<GoalEnhancer>>,
}

impl std::fmt::Debug for CandidateGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateGenerator")
            .field("enhancer", &self.enhancer.is_some())
            .finish()
    }
}

impl CandidateGenerator {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a credentialed enhancer
    #[inline]
    #[must_use]
    pub fn with_enhancer(mut self, enhancer: Arc<GoalEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Rule candidates, deduplicated and capped, then optionally enhanced
    pub async fn generate(&self, snapshot: &GoalSignalSnapshot, options: GenerateOptions) -> GenerationResult {
        let candidates = dedup_and_cap(rule_candidates(snapshot, options.now), options.max_candidates);

        if !options.llm_enhancer_enabled {
            return GenerationResult {
                candidates,
                fallback: Some(FallbackReason::Disabled),
            };
        }
        let Some(enhancer) = &self.enhancer else {
            tracing::warn!(reason = %FallbackReason::MissingApiKey, "goal enhancer enabled without a credential");
            return GenerationResult {
                candidates,
                fallback: Some(FallbackReason::MissingApiKey),
            };
        };

        match enhancer.enhance(&candidates, snapshot, options.now).await {
            EnhancementOutcome::Enhanced(rewritten) => GenerationResult {
                candidates: dedup_and_cap(rewritten, options.max_candidates),
                fallback: None,
            },
            EnhancementOutcome::Fallback(reason) => GenerationResult {
                candidates,
                fallback: Some(reason),
            },
        }
    }
}

/// Collapse equal signatures to their first occurrence and keep at most `max`
#[must_use]
pub fn dedup_and_cap(candidates: Vec<AutonomousGoalCandidate>, max: usize) -> Vec<AutonomousGoalCandidate> {
    let mut unique: IndexMap<GoalSignature, AutonomousGoalCandidate> = IndexMap::with_capacity(candidates.len());
    for candidate in candidates {
        unique.entry(candidate.signature.clone()).or_insert(candidate);
    }
    unique.into_values().take(max.max(1)).collect()
}

/// Clamp into `[0.05, 0.99]` and round to 2 decimals
#[must_use]
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return MIN_CONFIDENCE;
    }
    (raw.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE) * 100.0).round() / 100.0
}

fn indicator(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// Evaluate every rule against the snapshot, in rule order, before dedup
#[must_use]
pub fn rule_candidates(snapshot: &GoalSignalSnapshot, now: DateTime<Utc>) -> Vec<AutonomousGoalCandidate> {
    let m = &snapshot.metrics;
    let a = &snapshot.anomalies;
    let f = &snapshot.failover;
    let c = &snapshot.cost;
    let mem = &snapshot.memory;
    let p = &snapshot.policy;

    let anomaly_active = a.active_count > 0;
    let mut out = Vec::new();
    let mut push = |draft: Draft| out.push(draft.build(snapshot, now));

    // Rule 1: high pressure
    if m.cpu_usage >= 75.0 || anomaly_active || (m.tx_pool_trend == TxPoolTrend::Rising && m.tx_pool_pending >= 500) {
        let risk = if a.critical_count > 0 || m.cpu_usage >= 90.0 {
            GoalRisk::Critical
        } else {
            GoalRisk::High
        };
        let confidence = 0.62
            + 0.14 * indicator(anomaly_active)
            + 0.12 * indicator(m.cpu_usage >= 85.0)
            + 0.1 * indicator(m.tx_pool_pending >= 1_000);
        push(Draft {
            source: if anomaly_active { GoalSource::Anomaly } else { GoalSource::Metrics },
            intent: GoalIntent::Stabilize,
            risk,
            confidence,
            goal: format!("Stabilize {} node load and relieve transaction pool pressure", snapshot.chain_type),
            rationale: format!(
                "cpu {:.1}%, txpool {} ({:?}), anomalies {} active / {} critical",
                m.cpu_usage, m.tx_pool_pending, m.tx_pool_trend, a.active_count, a.critical_count
            ),
            metadata: CandidateMetadata::HighPressure {
                cpu_usage: m.cpu_usage,
                tx_pool_pending: m.tx_pool_pending,
                active_anomalies: a.active_count,
                critical_anomalies: a.critical_count,
            },
        });
    }

    // Rule 2: recent failover
    if f.recent_count > 0 {
        push(Draft {
            source: GoalSource::Failover,
            intent: GoalIntent::Investigate,
            risk: if f.recent_count >= 2 { GoalRisk::High } else { GoalRisk::Medium },
            confidence: 0.58 + (f64::from(f.recent_count) * 0.08).min(0.24),
            goal: "Investigate recent RPC failover events and verify endpoint health".to_string(),
            rationale: format!(
                "{} failover event(s) recently; active endpoint {}",
                f.recent_count,
                f.active_endpoint.as_deref().unwrap_or("unknown")
            ),
            metadata: CandidateMetadata::FailoverRecent { recent_count: f.recent_count },
        });
    }

    // Rule 3: cost-optimizable
    if !anomaly_active
        && f.recent_count == 0
        && p.cooldown_remaining_seconds == 0
        && c.data_point_count >= 24
        && c.avg_vcpu >= 2.0
        && c.avg_utilization <= 45.0
    {
        let confidence = 0.56
            + ((45.0 - c.avg_utilization) / 100.0).max(0.0).min(0.18)
            + (f64::from(c.data_point_count) / 1_000.0).min(0.12);
        push(Draft {
            source: GoalSource::Cost,
            intent: GoalIntent::CostOptimize,
            risk: GoalRisk::Medium,
            confidence,
            goal: format!("Right-size {} node resources to reduce idle vCPU cost", snapshot.chain_type),
            rationale: format!(
                "avg {:.1} vCPU at {:.1}% utilization over {} samples",
                c.avg_vcpu, c.avg_utilization, c.data_point_count
            ),
            metadata: CandidateMetadata::CostOptimizable {
                avg_vcpu: c.avg_vcpu,
                avg_utilization: c.avg_utilization,
                data_point_count: c.data_point_count,
            },
        });
    }

    // Rule 4: recurrent incidents
    if mem.recent_incident_count >= 3 || mem.recent_high_severity_count >= 2 {
        push(Draft {
            source: GoalSource::Memory,
            intent: GoalIntent::Investigate,
            risk: if mem.recent_high_severity_count >= 2 {
                GoalRisk::High
            } else {
                GoalRisk::Medium
            },
            confidence: 0.53 + (f64::from(mem.recent_incident_count) * 0.05).min(0.25),
            goal: "Investigate recurring incident pattern and prepare preventive remediation".to_string(),
            rationale: format!(
                "{} recent incidents, {} high severity",
                mem.recent_incident_count, mem.recent_high_severity_count
            ),
            metadata: CandidateMetadata::RecurrentIncidents {
                recent_incident_count: mem.recent_incident_count,
                recent_high_severity_count: mem.recent_high_severity_count,
            },
        });
    }

    // Rule 5: autoscaling disabled under load
    if !p.auto_scaling_enabled && (m.cpu_usage >= 70.0 || anomaly_active) {
        push(Draft {
            source: GoalSource::Policy,
            intent: GoalIntent::Investigate,
            risk: GoalRisk::High,
            confidence: 0.64,
            goal: "Review disabled autoscaling policy while the node is under load".to_string(),
            rationale: format!(
                "autoscaling off with cpu {:.1}% and {} active anomalies",
                m.cpu_usage, a.active_count
            ),
            metadata: CandidateMetadata::AutoscalingDisabled {
                cpu_usage: m.cpu_usage,
                active_anomalies: a.active_count,
            },
        });
    }

    // Rule 6: baseline
    if out.is_empty() {
        out.push(
            Draft {
                source: GoalSource::Metrics,
                intent: GoalIntent::Investigate,
                risk: GoalRisk::Low,
                confidence: 0.42,
                goal: format!("Review {} operations baseline and confirm node health", snapshot.chain_type),
                rationale: "no rule fired; periodic operations review".to_string(),
                metadata: CandidateMetadata::Baseline,
            }
            .build(snapshot, now),
        );
    }

    for candidate in &out {
        tracing::debug!(
            signature = %candidate.signature,
            intent = %candidate.intent,
            risk = %candidate.risk,
            confidence = candidate.confidence,
            "rule fired"
        );
    }
    out
}

struct Draft {
    source: GoalSource,
    intent: GoalIntent,
    risk: GoalRisk,
    confidence: f64,
    goal: String,
    rationale: String,
    metadata: CandidateMetadata,
}

impl Draft {
    fn build(self, snapshot: &GoalSignalSnapshot, now: DateTime<Utc>) -> AutonomousGoalCandidate {
        AutonomousGoalCandidate {
            id: CandidateId::new(),
            created_at: now,
            updated_at: now,
            source: self.source,
            status: CandidateStatus::Candidate,
            signature: GoalSignature::compute(&snapshot.chain_type, self.source, self.intent, &self.goal),
            goal: self.goal,
            intent: self.intent,
            risk: self.risk,
            confidence: normalize_confidence(self.confidence),
            rationale: self.rationale,
            signal_snapshot_id: snapshot.snapshot_id.clone(),
            score: None,
            suppression_reason_code: None,
            metadata: Some(self.metadata),
        }
    }
}
