//! Autogoal Store - persistence contract for the goal queue
//!
//! The orchestrator and priority engine never touch ambient state; every
//! list, lease and barrier lives behind [`GoalStore`]. Lease acquisition and
//! idempotency registration are atomic conditional writes, so concurrent
//! dispatch workers cannot both win the same goal.
//!
//! [`MemoryGoalStore`] is the in-process implementation used by the CLI and
//! the test suites.

#![allow(missing_docs)]

pub mod due_index;
pub mod error;
pub mod memory;
pub mod store;

pub use due_index::DueIndex;
pub use error::StoreError;
pub use memory::MemoryGoalStore;
pub use store::{GoalStore, LeaseAcquisition};
