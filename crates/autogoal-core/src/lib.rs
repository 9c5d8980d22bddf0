//! Autogoal Core - goal autonomy pipeline
//!
//! Selects operational goals and hands each one off to a planner exactly once:
//! - [`CandidateGenerator`]: rule-based goal proposals from a signal snapshot
//! - [`GoalEnhancer`]: optional, fallible LLM rephrasing
//! - [`PriorityEngine`]: scoring, suppression and queue admission
//! - [`GoalOrchestrator`]: leases, idempotency, checkpoints, retry/backoff, DLQ
//! - [`GoalAutonomyEngine`]: the facade wiring all of the above to one store
//!
//! # Example
//!
//! ```rust,no_run
//! use autogoal_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(source: Arc<dyn SignalSource>, planner: Arc<dyn GoalPlanner>) -> Result<(), AutonomyError> {
//! let engine = GoalAutonomyEngine::new(
//!     AutonomyConfig::load(None)?,
//!     Arc::new(MemoryGoalStore::new()),
//!     source,
//!     Arc::new(RulePolicyEngine::default()),
//!     planner,
//! )?;
//!
//! engine.run_generation_tick(None).await?;
//! let outcome = engine.dispatch(DispatchOptions::default()).await;
//! println!("{}", outcome.reason);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod api;
pub mod candidates;
pub mod config;
pub mod engine;
pub mod enhancer;
pub mod error;
pub mod orchestrator;
pub mod priority;

pub use api::{
    EpisodeOutcome, EpisodeStage, ExecutionLogEntry, GoalPlanner, LearningEpisode, LearningRecorder, Plan,
    PlanExecution, PlanOptions, PlanStatus, PlanStep, PolicyDecision, PolicyEngine, PolicyRequest, PolicyVerdict,
    RulePolicyEngine, SignalSource, StepStatus, TextCompletion, TracingLearningRecorder,
};
pub use candidates::{CandidateGenerator, GenerateOptions, GenerationResult};
pub use config::{AutonomyConfig, EnhancerConfig, GeneratorConfig, OrchestratorConfig, PriorityPolicy};
pub use engine::{GoalAutonomyEngine, GoalManagerState, QueueDepth, TickSummary};
pub use enhancer::{EnhancementOutcome, GoalEnhancer, OpenAiCompatibleCompletion};
pub use error::{AutonomyError, ConfigError, EnhancerError, FallbackReason, PlannerError};
pub use orchestrator::{
    DispatchOptions, DispatchOutcome, DispatchReason, GoalOrchestrator, MaintenanceReport, ReplayOutcome,
    ReplayReason,
};
pub use priority::{PriorityEngine, PriorityInput, PriorityOutcome};

/// Prelude for common imports
pub mod prelude {
    pub use crate::api::*;
    pub use crate::candidates::{CandidateGenerator, GenerateOptions};
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::error::*;
    pub use crate::orchestrator::*;
    pub use crate::priority::*;
    pub use autogoal_store::{GoalStore, MemoryGoalStore};
    pub use autogoal_types::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
