//! Persistence contract
//!
//! Every call is a suspension point for the dispatch worker. Implementations
//! must make [`GoalStore::try_acquire_lease`], [`GoalStore::register_idempotency`]
//! and [`GoalStore::release_goal`] atomic with respect to each other.

use crate::error::StoreError;
use async_trait::async_trait;
use autogoal_types::{
    AutonomousGoalCandidate, AutonomousGoalQueueItem, GoalDlqItem, GoalExecutionCheckpoint, GoalId,
    GoalIdempotencyRecord, GoalLeaseRecord, GoalSuppressionRecord, IdempotencyKey, OwnerId,
    QueueStatus,
};
use chrono::{DateTime, Duration, Utc};

/// Result of a conditional lease write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquisition {
    /// Lease written for the caller
    Acquired(GoalLeaseRecord),
    /// An unexpired lease is held by another owner
    Held(GoalLeaseRecord),
}

impl LeaseAcquisition {
    #[inline]
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// Storage used by the priority engine and orchestrator
#[async_trait]
pub trait GoalStore: Send + Sync + std::fmt::Debug {
    // Candidates and suppression audit

    async fn append_candidates(&self, candidates: &[AutonomousGoalCandidate]) -> Result<(), StoreError>;

    /// Most recent candidates first
    async fn list_candidates(&self, limit: usize) -> Result<Vec<AutonomousGoalCandidate>, StoreError>;

    async fn append_suppressions(&self, records: &[GoalSuppressionRecord]) -> Result<(), StoreError>;

    /// Most recent records first
    async fn list_suppressions(&self, limit: usize) -> Result<Vec<GoalSuppressionRecord>, StoreError>;

    // Queue

    /// Insert new items; fails on an id that is already present
    async fn insert_queue_items(&self, items: Vec<AutonomousGoalQueueItem>) -> Result<(), StoreError>;

    /// All items in dispatch order
    async fn list_queue(&self) -> Result<Vec<AutonomousGoalQueueItem>, StoreError>;

    async fn get_queue_item(&self, goal_id: GoalId) -> Result<Option<AutonomousGoalQueueItem>, StoreError>;

    /// Replace an existing item by goal id
    async fn update_queue_item(&self, item: &AutonomousGoalQueueItem) -> Result<(), StoreError>;

    /// Replace an item only if its stored status is still `expected`.
    /// Returns `false` when another worker moved it first.
    async fn compare_and_update_queue_item(
        &self,
        item: &AutonomousGoalQueueItem,
        expected: QueueStatus,
    ) -> Result<bool, StoreError>;

    /// First `queued` item in dispatch order whose retry instant has passed
    async fn next_due_goal(&self, now: DateTime<Utc>) -> Result<Option<AutonomousGoalQueueItem>, StoreError>;

    /// `queued` items whose `expires_at` is at or before `now`
    async fn list_expired_queued(&self, now: DateTime<Utc>) -> Result<Vec<AutonomousGoalQueueItem>, StoreError>;

    /// Items currently `scheduled` or `running`
    async fn list_in_flight(&self) -> Result<Vec<AutonomousGoalQueueItem>, StoreError>;

    // Leases

    async fn get_lease(&self, goal_id: GoalId) -> Result<Option<GoalLeaseRecord>, StoreError>;

    /// Atomically take the lease unless an unexpired one exists
    async fn try_acquire_lease(
        &self,
        goal_id: GoalId,
        owner: &OwnerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, StoreError>;

    /// Extend a lease held by `owner`
    async fn heartbeat_lease(
        &self,
        goal_id: GoalId,
        owner: &OwnerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<GoalLeaseRecord, StoreError>;

    // Idempotency

    /// Insert-if-absent; an expired record counts as absent. Returns `false`
    /// when a live record with the same key already exists.
    async fn register_idempotency(
        &self,
        record: GoalIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn get_idempotency(&self, key: &IdempotencyKey) -> Result<Option<GoalIdempotencyRecord>, StoreError>;

    async fn remove_idempotency(&self, key: &IdempotencyKey) -> Result<(), StoreError>;

    // Checkpoints and the active pointer

    async fn put_checkpoint(&self, checkpoint: GoalExecutionCheckpoint) -> Result<(), StoreError>;

    async fn get_checkpoint(&self, goal_id: GoalId) -> Result<Option<GoalExecutionCheckpoint>, StoreError>;

    async fn set_active_goal(&self, goal_id: GoalId) -> Result<(), StoreError>;

    async fn active_goal(&self) -> Result<Option<GoalId>, StoreError>;

    /// Delete lease and checkpoint and clear the active pointer if it names
    /// this goal, as one step
    ///
    /// With `owner` set, nothing is touched when the stored lease belongs to
    /// someone else. Returns whether the goal was released.
    async fn release_goal(&self, goal_id: GoalId, owner: Option<&OwnerId>) -> Result<bool, StoreError>;

    // Dead-letter queue

    async fn push_dlq(&self, item: GoalDlqItem) -> Result<(), StoreError>;

    async fn list_dlq(&self) -> Result<Vec<GoalDlqItem>, StoreError>;

    /// Remove and return the DLQ entry of a goal
    async fn take_dlq(&self, goal_id: GoalId) -> Result<Option<GoalDlqItem>, StoreError>;

    /// Drop every record
    async fn reset(&self) -> Result<(), StoreError>;
}
