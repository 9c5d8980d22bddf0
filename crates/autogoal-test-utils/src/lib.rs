//! Testing utilities for the autogoal workspace
//!
//! Shared snapshot fixtures and scripted collaborator fakes.

#![allow(missing_docs)]

use async_trait::async_trait;
use autogoal_core::{
    AutonomyConfig, AutonomyError, ExecutionLogEntry, GoalAutonomyEngine, GoalOrchestrator, GoalPlanner,
    LearningEpisode, LearningRecorder, OrchestratorConfig, Plan, PlanExecution, PlanOptions, PlanStatus,
    PlannerError, PolicyDecision, PolicyEngine, PolicyRequest, PolicyVerdict, SignalSource, StepStatus,
};
use autogoal_store::MemoryGoalStore;
use autogoal_types::{GoalSignalSnapshot, GoalSource, TxPoolTrend};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub const CHAIN: &str = "optimism";

/// Quiet node: only the baseline rule fires
pub fn calm_snapshot(now: DateTime<Utc>) -> GoalSignalSnapshot {
    let mut snap = GoalSignalSnapshot::new("snap-calm", CHAIN, now);
    snap.sources = [GoalSource::Metrics, GoalSource::Policy].into_iter().collect();
    snap.metrics.cpu_usage = 32.0;
    snap.metrics.memory_usage = 41.0;
    snap.metrics.tx_pool_pending = 120;
    snap
}

/// cpu=86, txPool=1800 rising, one active and one critical anomaly
pub fn high_pressure_snapshot(now: DateTime<Utc>) -> GoalSignalSnapshot {
    let mut snap = GoalSignalSnapshot::new("snap-pressure", CHAIN, now);
    snap.sources = [GoalSource::Metrics, GoalSource::Anomaly, GoalSource::Policy]
        .into_iter()
        .collect();
    snap.metrics.cpu_usage = 86.0;
    snap.metrics.memory_usage = 71.0;
    snap.metrics.tx_pool_pending = 1_800;
    snap.metrics.tx_pool_trend = TxPoolTrend::Rising;
    snap.anomalies.active_count = 1;
    snap.anomalies.critical_count = 1;
    snap
}

/// Snapshot source returning a fixed snapshot that tests can swap
#[derive(Debug)]
pub struct StaticSignalSource {
    snapshot: Mutex<GoalSignalSnapshot>,
}

impl StaticSignalSource {
    pub fn new(snapshot: GoalSignalSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn set(&self, snapshot: GoalSignalSnapshot) {
        *self.snapshot.lock() = snapshot;
    }
}

#[async_trait]
impl SignalSource for StaticSignalSource {
    async fn collect(&self) -> Result<GoalSignalSnapshot, AutonomyError> {
        Ok(self.snapshot.lock().clone())
    }
}

/// Policy returning the same decision for every request
#[derive(Debug)]
pub struct StaticPolicy {
    decision: PolicyDecision,
    requests: Mutex<Vec<PolicyRequest>>,
}

impl StaticPolicy {
    pub fn allow() -> Arc<Self> {
        Self::with(PolicyDecision::allow())
    }

    pub fn deny(reason_code: &str) -> Arc<Self> {
        Self::with(PolicyDecision::new(PolicyVerdict::Deny, reason_code, "denied by test policy"))
    }

    pub fn with(decision: PolicyDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<PolicyRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PolicyEngine for StaticPolicy {
    async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        self.requests.lock().push(request.clone());
        self.decision.clone()
    }
}

/// One scripted planner response
#[derive(Debug, Clone)]
pub enum PlannerStep {
    Complete,
    /// Plan finishes `failed` with this message on its failing step
    Fail(String),
    /// Planner raises an exception with this message
    Throw(String),
}

/// Planner replaying a script; completes once the script runs out
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<PlannerStep>>,
    calls: Mutex<Vec<(String, PlanOptions)>>,
}

impl ScriptedPlanner {
    pub fn new(steps: impl IntoIterator<Item = PlannerStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn completing() -> Arc<Self> {
        Self::new([])
    }

    pub fn failing(times: usize, message: &str) -> Arc<Self> {
        Self::new(std::iter::repeat(PlannerStep::Fail(message.to_string())).take(times))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(String, PlanOptions)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GoalPlanner for ScriptedPlanner {
    async fn plan_and_execute(&self, goal: &str, options: &PlanOptions) -> Result<PlanExecution, PlannerError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push((goal.to_string(), options.clone()));
            calls.len()
        };
        let step = self.script.lock().pop_front().unwrap_or(PlannerStep::Complete);
        let plan_id = format!("plan-{call}");
        match step {
            PlannerStep::Complete => Ok(PlanExecution {
                plan: Plan {
                    plan_id,
                    status: PlanStatus::Completed,
                    steps: vec![],
                },
                execution_log: vec![ExecutionLogEntry {
                    step_id: "verify".into(),
                    action: "verify".into(),
                    status: StepStatus::Success,
                    message: "healthy".into(),
                }],
            }),
            PlannerStep::Fail(message) => Ok(PlanExecution {
                plan: Plan {
                    plan_id,
                    status: PlanStatus::Failed,
                    steps: vec![],
                },
                execution_log: vec![
                    ExecutionLogEntry {
                        step_id: "inspect".into(),
                        action: "inspect".into(),
                        status: StepStatus::Success,
                        message: "ok".into(),
                    },
                    ExecutionLogEntry {
                        step_id: "act".into(),
                        action: "scale".into(),
                        status: StepStatus::Failed,
                        message,
                    },
                ],
            }),
            PlannerStep::Throw(message) => Err(PlannerError::Execution(message)),
        }
    }
}

/// Learning recorder keeping every episode in memory
#[derive(Debug, Default)]
pub struct RecordingLearner {
    episodes: Mutex<Vec<LearningEpisode>>,
}

impl RecordingLearner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn episodes(&self) -> Vec<LearningEpisode> {
        self.episodes.lock().clone()
    }
}

#[async_trait]
impl LearningRecorder for RecordingLearner {
    async fn record(&self, episode: LearningEpisode) {
        self.episodes.lock().push(episode);
    }
}

/// Orchestrator over a fresh store with the given collaborators
pub fn orchestrator(
    config: OrchestratorConfig,
    policy: Arc<dyn PolicyEngine>,
    planner: Arc<dyn GoalPlanner>,
) -> (GoalOrchestrator, Arc<MemoryGoalStore>) {
    let store = Arc::new(MemoryGoalStore::new());
    let orch = GoalOrchestrator::new(store.clone(), policy, planner, config);
    (orch, store)
}

/// Engine over a fresh store
pub fn engine(
    config: AutonomyConfig,
    source: Arc<dyn SignalSource>,
    policy: Arc<dyn PolicyEngine>,
    planner: Arc<dyn GoalPlanner>,
) -> (GoalAutonomyEngine, Arc<MemoryGoalStore>) {
    let store = Arc::new(MemoryGoalStore::new());
    let engine = GoalAutonomyEngine::new(config, store.clone(), source, policy, planner)
        .expect("engine config without enhancer is always valid");
    (engine, store)
}
