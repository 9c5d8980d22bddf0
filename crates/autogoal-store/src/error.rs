//! Store errors

use autogoal_types::GoalId;

/// Errors raised by a [`GoalStore`](crate::GoalStore) backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Queue item does not exist
    #[error("goal not found: {0}")]
    GoalNotFound(GoalId),

    /// A queue item with this id already exists
    #[error("goal already queued: {0}")]
    DuplicateGoal(GoalId),

    /// Lease is missing, expired, or held by someone else
    #[error("lease for goal {goal_id} is not owned by {owner}")]
    LeaseNotOwned { goal_id: GoalId, owner: String },

    /// Backend-specific failure
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
