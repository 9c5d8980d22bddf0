//! Autogoal Types - data model for the goal autonomy pipeline
//!
//! Every entity that flows between the candidate generator, the priority
//! engine, the durable queue and the orchestrator lives here:
//! - [`GoalSignalSnapshot`]: point-in-time operational signals
//! - [`AutonomousGoalCandidate`]: proposed goals before admission
//! - [`GoalPriorityScore`]: bounded admission score
//! - [`AutonomousGoalQueueItem`]: the durable dispatch unit
//! - Lease, checkpoint, idempotency, suppression and DLQ records
//!
//! # Example
//!
//! ```rust
//! use autogoal_types::{GoalIntent, GoalSignature, GoalSource};
//!
//! let a = GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "Scale  up");
//! let b = GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "scale up");
//! assert_eq!(a, b);
//! ```

#![allow(missing_docs)]

pub mod candidate;
pub mod hash;
pub mod ids;
pub mod queue;
pub mod records;
pub mod score;
pub mod snapshot;

pub use candidate::{
    AutonomousGoalCandidate, CandidateMetadata, CandidateStatus, GoalIntent, GoalRisk, GoalSource,
};
pub use hash::{normalize_goal_text, GoalSignature, IdempotencyKey, SIGNATURE_HEX_LEN};
pub use ids::{CandidateId, GoalId, OwnerId, RecordId};
pub use queue::{
    AutonomousGoalQueueItem, DlqReason, GoalDlqItem, QueueItemMetadata, QueueOrderKey, QueueStatus,
};
pub use records::{
    CheckpointPhase, GoalExecutionCheckpoint, GoalIdempotencyRecord, GoalLeaseRecord,
    GoalSuppressionRecord, SuppressionReason,
};
pub use score::GoalPriorityScore;
pub use snapshot::{
    AnomalySignal, CostSignal, FailoverSignal, GoalSignalSnapshot, MemorySignal, MetricsSignal,
    PolicySignal, TxPoolTrend,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
