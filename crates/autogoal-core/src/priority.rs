//! Priority engine
//!
//! Scores candidates, applies the suppression rules and converts admitted
//! candidates into queue items. Suppression precedence is fixed, first
//! match wins:
//!
//! 1. `stale_signal`
//! 2. `low_confidence`
//! 3. `cooldown_active`
//! 4. `policy_blocked`
//! 5. `duplicate_goal`
//!
//! Pure and synchronous; persistence is the caller's job.

use crate::config::PriorityPolicy;
use autogoal_types::{
    AutonomousGoalCandidate, AutonomousGoalQueueItem, CandidateStatus, GoalIntent, GoalPriorityScore,
    GoalRisk, GoalSignalSnapshot, GoalSignature, GoalSuppressionRecord, RecordId, SuppressionReason,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Everything one admission pass looks at
#[derive(Debug, Clone)]
pub struct PriorityInput<'a> {
    pub snapshot: &'a GoalSignalSnapshot,
    pub candidates: Vec<AutonomousGoalCandidate>,
    pub existing_queue: &'a [AutonomousGoalQueueItem],
    pub recent_candidates: &'a [AutonomousGoalCandidate],
    pub now: DateTime<Utc>,
}

/// Admission result
#[derive(Debug, Clone, Default)]
pub struct PriorityOutcome {
    /// New queue items in dispatch order
    pub queued: Vec<AutonomousGoalQueueItem>,
    /// Audit trail of rejected candidates
    pub suppressed: Vec<GoalSuppressionRecord>,
    /// Input candidates with status, score and suppression code filled in
    pub candidates: Vec<AutonomousGoalCandidate>,
}

#[derive(Debug, Clone, Default)]
pub struct PriorityEngine {
    policy: PriorityPolicy,
}

impl PriorityEngine {
    #[inline]
    #[must_use]
    pub fn new(policy: PriorityPolicy) -> Self {
        Self {
            policy: policy.clamped(),
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }

    /// Run one admission pass
    #[must_use]
    pub fn evaluate(&self, input: PriorityInput<'_>) -> PriorityOutcome {
        let PriorityInput {
            snapshot,
            candidates,
            existing_queue,
            recent_candidates,
            now,
        } = input;

        let mut known: HashSet<GoalSignature> = existing_queue
            .iter()
            .filter(|item| !item.status.is_terminal())
            .map(|item| item.signature.clone())
            .collect();
        let window_start = now - Duration::minutes(self.policy.dedup_window_minutes);
        let candidate_ids: HashSet<_> = candidates.iter().map(|c| c.id).collect();
        known.extend(
            recent_candidates
                .iter()
                .filter(|c| !candidate_ids.contains(&c.id))
                .filter(|c| c.last_seen_at() >= window_start)
                .map(|c| c.signature.clone()),
        );

        let mut outcome = PriorityOutcome::default();
        for mut candidate in candidates {
            if let Some((reason, details)) = self.suppression_for(&candidate, snapshot, now, &known) {
                tracing::debug!(
                    candidate_id = %candidate.id,
                    signature = %candidate.signature,
                    %reason,
                    "candidate suppressed"
                );
                outcome.suppressed.push(GoalSuppressionRecord {
                    id: RecordId::new(),
                    timestamp: now,
                    candidate_id: candidate.id,
                    signature: candidate.signature.clone(),
                    source: candidate.source,
                    risk: candidate.risk,
                    reason_code: reason,
                    details,
                });
                candidate.status = CandidateStatus::Suppressed;
                candidate.suppression_reason_code = Some(reason);
                candidate.updated_at = now;
                outcome.candidates.push(candidate);
                continue;
            }

            let score = self.score(&candidate, snapshot, now);
            let item = AutonomousGoalQueueItem::from_candidate(&candidate, score, now, self.policy.goal_ttl());
            tracing::info!(
                goal_id = %item.goal_id,
                signature = %item.signature,
                total = score.total,
                risk = %item.risk,
                "goal admitted"
            );
            known.insert(candidate.signature.clone());
            candidate.status = CandidateStatus::Queued;
            candidate.score = Some(score);
            candidate.updated_at = now;
            outcome.queued.push(item);
            outcome.candidates.push(candidate);
        }

        outcome.queued.sort_by_key(AutonomousGoalQueueItem::order_key);
        outcome
    }

    /// First matching suppression rule, in precedence order
    fn suppression_for(
        &self,
        candidate: &AutonomousGoalCandidate,
        snapshot: &GoalSignalSnapshot,
        now: DateTime<Utc>,
        known: &HashSet<GoalSignature>,
    ) -> Option<(SuppressionReason, String)> {
        let age = snapshot.age_at(now);
        if age > Duration::minutes(self.policy.stale_signal_minutes) {
            return Some((
                SuppressionReason::StaleSignal,
                format!(
                    "snapshot is {} min old (limit {})",
                    age.num_minutes(),
                    self.policy.stale_signal_minutes
                ),
            ));
        }
        if candidate.confidence < self.policy.min_confidence {
            return Some((
                SuppressionReason::LowConfidence,
                format!(
                    "confidence {:.2} below minimum {:.2}",
                    candidate.confidence, self.policy.min_confidence
                ),
            ));
        }
        let cooldown = snapshot.policy.cooldown_remaining_seconds;
        if cooldown > 0 && candidate.intent == GoalIntent::Stabilize && candidate.risk != GoalRisk::Critical {
            return Some((
                SuppressionReason::CooldownActive,
                format!("scaling cooldown active for {cooldown}s"),
            ));
        }
        if snapshot.policy.read_only_mode && candidate.intent.is_mutating() {
            return Some((
                SuppressionReason::PolicyBlocked,
                format!("read-only mode blocks {} goals", candidate.intent),
            ));
        }
        if known.contains(&candidate.signature) {
            return Some((
                SuppressionReason::DuplicateGoal,
                format!("signature {} already queued or recently seen", candidate.signature),
            ));
        }
        None
    }

    /// Bounded admission score
    ///
    /// - impact: risk tier plus a bonus for remediating intents
    /// - urgency: risk tier plus live anomaly / failover pressure, decayed
    ///   with snapshot age
    /// - confidence: candidate confidence scaled to 20
    /// - policy fit: 15 minus penalties for approval-prone or constrained goals
    #[must_use]
    pub fn score(&self, candidate: &AutonomousGoalCandidate, snapshot: &GoalSignalSnapshot, now: DateTime<Utc>) -> GoalPriorityScore {
        let impact = match candidate.risk {
            GoalRisk::Critical => 36.0,
            GoalRisk::High => 28.0,
            GoalRisk::Medium => 18.0,
            GoalRisk::Low => 10.0,
        } + match candidate.intent {
            GoalIntent::Stabilize | GoalIntent::Recover => 4.0,
            GoalIntent::Investigate => 2.0,
            GoalIntent::CostOptimize | GoalIntent::Custom => 0.0,
        };

        let age_minutes = snapshot.age_at(now).num_seconds() as f64 / 60.0;
        let freshness_decay = 6.0 * (age_minutes / self.policy.stale_signal_minutes.max(1) as f64).min(1.0);
        let urgency = match candidate.risk {
            GoalRisk::Critical => 18.0,
            GoalRisk::High => 13.0,
            GoalRisk::Medium => 8.0,
            GoalRisk::Low => 4.0,
        } + if snapshot.anomalies.active_count > 0 { 4.0 } else { 0.0 }
            + if snapshot.failover.recent_count > 0 { 3.0 } else { 0.0 }
            - freshness_decay;

        let confidence = candidate.confidence * GoalPriorityScore::CONFIDENCE_MAX;

        let mut policy_fit = GoalPriorityScore::POLICY_FIT_MAX;
        if candidate.risk == GoalRisk::Critical {
            policy_fit -= 5.0;
        }
        if candidate.intent == GoalIntent::Stabilize {
            if snapshot.policy.cooldown_remaining_seconds > 0 {
                policy_fit -= 4.0;
            }
            if !snapshot.policy.auto_scaling_enabled {
                policy_fit -= 4.0;
            }
        }
        if snapshot.policy.read_only_mode {
            policy_fit -= 3.0;
        }

        GoalPriorityScore::new(impact, urgency, confidence, policy_fit)
    }
}
