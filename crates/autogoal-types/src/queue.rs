//! Durable queue items and dead-letter entries
//!
//! A queue item is inserted by the priority engine and from then on owned
//! exclusively by the orchestrator. Its lifecycle:
//!
//! ```text
//! queued -> scheduled -> running -> completed
//!                                -> queued (requeued with backoff)
//!                                -> dlq -> queued (replay)
//!        -> expired
//! ```

use crate::candidate::{AutonomousGoalCandidate, GoalIntent, GoalRisk, GoalSource};
use crate::hash::{GoalSignature, IdempotencyKey};
use crate::ids::{CandidateId, GoalId, OwnerId, RecordId};
use crate::score::GoalPriorityScore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Scheduled,
    Running,
    Completed,
    Failed,
    Dlq,
    Expired,
}

impl QueueStatus {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
            Self::Expired => "expired",
        }
    }

    /// Statuses no dispatch will ever pick up again (short of a replay)
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Dlq | Self::Expired)
    }

    /// Statuses held by a worker mid-dispatch
    #[inline]
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed side-channel data carried by a queue item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemMetadata {
    pub signal_snapshot_id: String,
    pub rationale: String,
    /// Worker label of the last dispatch
    pub dispatch_worker: Option<String>,
    /// Version of the last lease held on this goal
    pub lease_version: Option<u64>,
    /// Machine-readable reason of the last failure
    pub failure_reason: Option<String>,
    /// Number of times the goal was replayed from the DLQ
    pub replay_count: u32,
}

/// The durable unit the orchestrator operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousGoalQueueItem {
    pub goal_id: GoalId,
    pub candidate_id: CandidateId,
    pub goal: String,
    pub intent: GoalIntent,
    pub source: GoalSource,
    pub risk: GoalRisk,
    pub confidence: f64,
    pub signature: GoalSignature,
    pub score: GoalPriorityScore,
    pub enqueued_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: QueueStatus,
    pub last_error: Option<String>,
    pub plan_id: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub lease_owner: Option<OwnerId>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub metadata: QueueItemMetadata,
}

impl AutonomousGoalQueueItem {
    /// Admit a candidate into the queue
    #[must_use]
    pub fn from_candidate(
        candidate: &AutonomousGoalCandidate,
        score: GoalPriorityScore,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            goal_id: GoalId::new(),
            candidate_id: candidate.id,
            goal: candidate.goal.clone(),
            intent: candidate.intent,
            source: candidate.source,
            risk: candidate.risk,
            confidence: candidate.confidence,
            signature: candidate.signature.clone(),
            score,
            enqueued_at: now,
            scheduled_at: None,
            next_attempt_at: None,
            started_at: None,
            finished_at: None,
            expires_at: now + ttl,
            attempts: 0,
            status: QueueStatus::Queued,
            last_error: None,
            plan_id: None,
            idempotency_key: None,
            lease_owner: None,
            lease_expires_at: None,
            metadata: QueueItemMetadata {
                signal_snapshot_id: candidate.signal_snapshot_id.clone(),
                rationale: candidate.rationale.clone(),
                ..QueueItemMetadata::default()
            },
        }
    }

    /// Whether the item may be dispatched at `now`
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Queued && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Sort key of the deterministic dispatch order
    #[inline]
    #[must_use]
    pub fn order_key(&self) -> QueueOrderKey {
        QueueOrderKey {
            total: self.score.total,
            risk_rank: self.risk.rank(),
            enqueued_at: self.enqueued_at,
            goal_id: self.goal_id,
        }
    }

    /// Reset to `queued` for a retry at `next_attempt_at`
    pub fn requeue(&mut self, next_attempt_at: DateTime<Utc>, error: impl Into<String>) {
        self.status = QueueStatus::Queued;
        self.next_attempt_at = Some(next_attempt_at);
        self.started_at = None;
        self.finished_at = None;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.last_error = Some(error.into());
    }

    /// Rebuild as a fresh `queued` item due at `now`, clearing all transient
    /// state. The retry budget starts over; the DLQ entry keeps the count.
    pub fn reset_for_replay(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.status = QueueStatus::Queued;
        self.attempts = 0;
        self.next_attempt_at = Some(now);
        self.scheduled_at = None;
        self.started_at = None;
        self.finished_at = None;
        self.expires_at = now + ttl;
        self.last_error = None;
        self.plan_id = None;
        self.idempotency_key = None;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.metadata.failure_reason = None;
        self.metadata.replay_count += 1;
    }
}

/// Total dispatch order: score desc, risk desc, enqueue time asc, goal id asc
#[derive(Debug, Clone, Copy)]
pub struct QueueOrderKey {
    pub total: f64,
    pub risk_rank: u8,
    pub enqueued_at: DateTime<Utc>,
    pub goal_id: GoalId,
}

impl PartialEq for QueueOrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueOrderKey {}

impl Ord for QueueOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.risk_rank.cmp(&self.risk_rank))
            .then_with(|| self.enqueued_at.cmp(&other.enqueued_at))
            // ULID ordering matches the lexicographic order of its string form
            .then_with(|| self.goal_id.cmp(&other.goal_id))
    }
}

impl PartialOrd for QueueOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqReason {
    MaxRetriesExceeded,
    RuntimeException,
}

impl DlqReason {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::RuntimeException => "runtime_exception",
        }
    }
}

/// Dead-lettered goal with a full snapshot of the item at failure time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalDlqItem {
    pub id: RecordId,
    pub goal_id: GoalId,
    pub moved_at: DateTime<Utc>,
    pub reason: DlqReason,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub queue_item: AutonomousGoalQueueItem,
}
