//! Audit and coordination records
//!
//! - [`GoalSuppressionRecord`]: append-only admission rejections
//! - [`GoalLeaseRecord`]: time-bounded exclusivity for one goal
//! - [`GoalExecutionCheckpoint`]: current dispatch phase of a goal
//! - [`GoalIdempotencyRecord`]: write-once dispatch barrier

use crate::candidate::{GoalRisk, GoalSource};
use crate::hash::{GoalSignature, IdempotencyKey};
use crate::ids::{CandidateId, GoalId, OwnerId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Admission-time rejection reason, in evaluation precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    StaleSignal,
    LowConfidence,
    CooldownActive,
    PolicyBlocked,
    DuplicateGoal,
}

impl SuppressionReason {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StaleSignal => "stale_signal",
            Self::LowConfidence => "low_confidence",
            Self::CooldownActive => "cooldown_active",
            Self::PolicyBlocked => "policy_blocked",
            Self::DuplicateGoal => "duplicate_goal",
        }
    }
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSuppressionRecord {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub candidate_id: CandidateId,
    pub signature: GoalSignature,
    pub source: GoalSource,
    pub risk: GoalRisk,
    pub reason_code: SuppressionReason,
    pub details: String,
}

/// Exclusive, TTL-bounded ownership of a goal by one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalLeaseRecord {
    pub goal_id: GoalId,
    pub owner_id: OwnerId,
    pub leased_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    /// Incremented on every re-acquisition of the goal
    pub version: u64,
}

impl GoalLeaseRecord {
    /// A lease is live strictly before its expiry instant
    #[inline]
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    Scheduled,
    LeaseAcquired,
    PolicyCheck,
    PlanStarted,
    PlanCompleted,
    VerifyCompleted,
    Requeued,
    Failed,
    Dlq,
}

impl CheckpointPhase {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::LeaseAcquired => "lease_acquired",
            Self::PolicyCheck => "policy_check",
            Self::PlanStarted => "plan_started",
            Self::PlanCompleted => "plan_completed",
            Self::VerifyCompleted => "verify_completed",
            Self::Requeued => "requeued",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
        }
    }
}

/// Forensic record of the current dispatch phase, overwritten per transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalExecutionCheckpoint {
    pub goal_id: GoalId,
    pub phase: CheckpointPhase,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub attempts: u32,
    pub owner_id: Option<OwnerId>,
}

/// Write-once barrier for one equivalent dispatch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalIdempotencyRecord {
    pub key: IdempotencyKey,
    pub goal_id: GoalId,
    pub owner_id: OwnerId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GoalIdempotencyRecord {
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
