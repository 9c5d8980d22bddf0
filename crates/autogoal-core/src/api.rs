//! Collaborator contracts
//!
//! The pipeline consumes five external services through narrow traits:
//! - [`SignalSource`]: produces a [`GoalSignalSnapshot`]
//! - [`PolicyEngine`]: allow / deny / approval decisions
//! - [`GoalPlanner`]: plans and runs remediation steps for a goal
//! - [`LearningRecorder`]: fire-and-forget outcome telemetry
//! - [`TextCompletion`]: the LLM behind the goal enhancer
//!
//! Every method is a suspension point of the dispatch worker. Timeouts are
//! the collaborator's concern; the orchestrator awaits the result.

use crate::error::{AutonomyError, EnhancerError, PlannerError};
use async_trait::async_trait;
use autogoal_types::{GoalId, GoalRisk, GoalSignalSnapshot, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of operational snapshots
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn collect(&self) -> Result<GoalSignalSnapshot, AutonomyError>;
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Input of a policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub auto_execute: bool,
    pub allow_writes: bool,
    pub read_only_mode: bool,
    pub risk: GoalRisk,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allow,
    Deny,
    RequireApproval,
    RequireMultiApproval,
}

impl PolicyVerdict {
    /// Whether autonomous execution may proceed
    #[inline]
    #[must_use]
    pub const fn permits_execution(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Policy engine answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: PolicyVerdict,
    pub reason_code: String,
    pub message: String,
}

impl PolicyDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            decision: PolicyVerdict::Allow,
            reason_code: "allowed".to_string(),
            message: "autonomous execution permitted".to_string(),
        }
    }

    #[must_use]
    pub fn new(decision: PolicyVerdict, reason_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            decision,
            reason_code: reason_code.into(),
            message: message.into(),
        }
    }
}

/// Allow / deny / approval decisions for autonomous execution
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision;
}

/// Baseline rule set used when no external policy service is wired in
///
/// - writes in read-only mode are denied
/// - critical risk needs multi-party approval
/// - confidence below `approval_confidence` needs approval
#[derive(Debug, Clone)]
pub struct RulePolicyEngine {
    pub approval_confidence: f64,
}

impl Default for RulePolicyEngine {
    fn default() -> Self {
        Self { approval_confidence: 0.6 }
    }
}

#[async_trait]
impl PolicyEngine for RulePolicyEngine {
    async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        if request.read_only_mode && request.allow_writes {
            return PolicyDecision::new(
                PolicyVerdict::Deny,
                "read_only_write_blocked",
                "writes are not permitted while the node is in read-only mode",
            );
        }
        if request.risk == GoalRisk::Critical {
            return PolicyDecision::new(
                PolicyVerdict::RequireMultiApproval,
                "critical_risk_requires_approval",
                "critical-risk goals need operator sign-off",
            );
        }
        if request.confidence < self.approval_confidence {
            return PolicyDecision::new(
                PolicyVerdict::RequireApproval,
                "low_confidence_requires_approval",
                format!(
                    "confidence {:.2} is below the autonomous threshold {:.2}",
                    request.confidence, self.approval_confidence
                ),
            );
        }
        PolicyDecision::allow()
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Execution flags handed to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    pub dry_run: bool,
    pub allow_writes: bool,
    pub initiated_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step_id: String,
    pub action: String,
    pub status: StepStatus,
    pub message: String,
}

/// Terminal result of a plan run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanExecution {
    pub plan: Plan,
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl PlanExecution {
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.plan.status == PlanStatus::Completed
    }

    /// Message of the first failed step
    #[must_use]
    pub fn first_failure(&self) -> Option<&str> {
        self.execution_log
            .iter()
            .find(|entry| entry.status == StepStatus::Failed)
            .map(|entry| entry.message.as_str())
    }
}

/// Builds and runs remediation steps for a goal
#[async_trait]
pub trait GoalPlanner: Send + Sync {
    /// `Err` is an exception; `Ok` with a failed plan is a plan failure
    async fn plan_and_execute(&self, goal: &str, options: &PlanOptions) -> Result<PlanExecution, PlannerError>;
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStage {
    Dispatch,
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Completed,
    Requeued,
    DeadLettered,
}

/// Outcome telemetry of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningEpisode {
    pub id: RecordId,
    pub goal_id: GoalId,
    pub stage: EpisodeStage,
    pub outcome: EpisodeOutcome,
    pub verification_passed: bool,
    pub rolled_back: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only sink for learning episodes
///
/// Failures are the recorder's to log; the orchestrator does not wait on
/// them beyond the call itself.
#[async_trait]
pub trait LearningRecorder: Send + Sync {
    async fn record(&self, episode: LearningEpisode);
}

/// Recorder that emits each episode as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLearningRecorder;

#[async_trait]
impl LearningRecorder for TracingLearningRecorder {
    async fn record(&self, episode: LearningEpisode) {
        tracing::info!(
            goal_id = %episode.goal_id,
            outcome = ?episode.outcome,
            attempts = episode.attempts,
            latency_ms = episode.latency_ms,
            "learning episode"
        );
    }
}

// ---------------------------------------------------------------------------
// Text completion
// ---------------------------------------------------------------------------

/// Chat-style text completion used by the enhancer
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, EnhancerError>;
}
