//! Goal autonomy engine
//!
//! Wires the pipeline end to end around one injected [`GoalStore`]:
//! snapshot -> candidates -> admission -> queue -> dispatch.

use crate::api::{GoalPlanner, LearningRecorder, PolicyEngine, SignalSource};
use crate::candidates::{CandidateGenerator, GenerateOptions};
use crate::config::AutonomyConfig;
use crate::enhancer::GoalEnhancer;
use crate::error::{AutonomyError, FallbackReason};
use crate::orchestrator::{DispatchOptions, DispatchOutcome, GoalOrchestrator, ReplayOutcome};
use crate::priority::{PriorityEngine, PriorityInput};
use autogoal_store::GoalStore;
use autogoal_types::{GoalId, QueueStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of stored candidates consulted for recent-duplicate checks
const RECENT_CANDIDATE_LIMIT: usize = 500;

/// Result of one generation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub snapshot_id: String,
    pub ran_at: DateTime<Utc>,
    pub generated: usize,
    pub queued: usize,
    pub suppressed: usize,
    pub queued_goal_ids: Vec<GoalId>,
    /// Set when the enhancer did not rewrite the candidates
    pub enhancer_fallback: Option<FallbackReason>,
}

/// Queue depth by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub queued: usize,
    pub scheduled: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dlq: usize,
    pub expired: usize,
}

impl QueueDepth {
    fn count(&mut self, status: QueueStatus) {
        let slot = match status {
            QueueStatus::Queued => &mut self.queued,
            QueueStatus::Scheduled => &mut self.scheduled,
            QueueStatus::Running => &mut self.running,
            QueueStatus::Completed => &mut self.completed,
            QueueStatus::Failed => &mut self.failed,
            QueueStatus::Dlq => &mut self.dlq,
            QueueStatus::Expired => &mut self.expired,
        };
        *slot += 1;
    }

    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.queued + self.scheduled + self.running + self.completed + self.failed + self.dlq + self.expired
    }
}

/// Read-only view of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalManagerState {
    pub queue_depth: QueueDepth,
    pub dlq_size: usize,
    pub active_goal: Option<GoalId>,
    pub last_tick: Option<TickSummary>,
}

/// Facade over generator, priority engine and orchestrator
pub struct GoalAutonomyEngine {
    config: AutonomyConfig,
    store: Arc<dyn GoalStore>,
    source: Arc<dyn SignalSource>,
    generator: CandidateGenerator,
    priority: PriorityEngine,
    orchestrator: GoalOrchestrator,
    last_tick: Mutex<Option<TickSummary>>,
}

impl std::fmt::Debug for GoalAutonomyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalAutonomyEngine")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl GoalAutonomyEngine {
    /// Build the engine; the enhancer is attached when the config carries a key
    pub fn new(
        config: AutonomyConfig,
        store: Arc<dyn GoalStore>,
        source: Arc<dyn SignalSource>,
        policy: Arc<dyn PolicyEngine>,
        planner: Arc<dyn GoalPlanner>,
    ) -> Result<Self, AutonomyError> {
        let config = config.clamped();
        let mut generator = CandidateGenerator::new();
        if config.generator.llm_enhancer_enabled {
            if let Some(enhancer) = GoalEnhancer::from_config(&config.generator.enhancer)? {
                generator = generator.with_enhancer(Arc::new(enhancer));
            }
        }
        let orchestrator = GoalOrchestrator::new(store.clone(), policy, planner, config.orchestrator.clone())
            .with_replay_ttl(config.priority.goal_ttl());
        Ok(Self {
            priority: PriorityEngine::new(config.priority.clone()),
            config,
            store,
            source,
            generator,
            orchestrator,
            last_tick: Mutex::new(None),
        })
    }

    #[inline]
    #[must_use]
    pub fn with_learner(mut self, learner: Arc<dyn LearningRecorder>) -> Self {
        self.orchestrator = self.orchestrator.with_learner(learner);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.orchestrator = self.orchestrator.with_worker(worker);
        self
    }

    /// Replace the generator, e.g. to inject a custom enhancer
    #[inline]
    #[must_use]
    pub fn with_generator(mut self, generator: CandidateGenerator) -> Self {
        self.generator = generator;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AutonomyConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &GoalOrchestrator {
        &self.orchestrator
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GoalStore> {
        &self.store
    }

    /// Collect, generate, admit and persist
    pub async fn run_generation_tick(&self, now: Option<DateTime<Utc>>) -> Result<TickSummary, AutonomyError> {
        let now = now.unwrap_or_else(Utc::now);
        let snapshot = self.source.collect().await?;

        let generation = self
            .generator
            .generate(
                &snapshot,
                GenerateOptions {
                    now,
                    max_candidates: self.config.generator.max_candidates,
                    llm_enhancer_enabled: self.config.generator.llm_enhancer_enabled,
                },
            )
            .await;
        let generated = generation.candidates.len();

        let existing_queue = self.store.list_queue().await?;
        let recent = self.store.list_candidates(RECENT_CANDIDATE_LIMIT).await?;
        let outcome = self.priority.evaluate(PriorityInput {
            snapshot: &snapshot,
            candidates: generation.candidates,
            existing_queue: &existing_queue,
            recent_candidates: &recent,
            now,
        });

        self.store.append_candidates(&outcome.candidates).await?;
        self.store.append_suppressions(&outcome.suppressed).await?;
        let queued_goal_ids = outcome.queued.iter().map(|item| item.goal_id).collect();
        let queued = outcome.queued.len();
        self.store.insert_queue_items(outcome.queued).await?;

        let summary = TickSummary {
            snapshot_id: snapshot.snapshot_id.clone(),
            ran_at: now,
            generated,
            queued,
            suppressed: outcome.suppressed.len(),
            queued_goal_ids,
            enhancer_fallback: generation.fallback,
        };
        tracing::info!(
            snapshot_id = %summary.snapshot_id,
            generated,
            queued,
            suppressed = summary.suppressed,
            "generation tick"
        );
        *self.last_tick.lock() = Some(summary.clone());
        Ok(summary)
    }

    #[inline]
    pub async fn dispatch(&self, options: DispatchOptions) -> DispatchOutcome {
        self.orchestrator.dispatch_next_goal(options).await
    }

    #[inline]
    pub async fn replay(&self, goal_id: GoalId, now: Option<DateTime<Utc>>) -> ReplayOutcome {
        self.orchestrator.replay_goal_from_dlq(goal_id, now).await
    }

    pub async fn state(&self) -> Result<GoalManagerState, AutonomyError> {
        let mut queue_depth = QueueDepth::default();
        for item in self.store.list_queue().await? {
            queue_depth.count(item.status);
        }
        Ok(GoalManagerState {
            queue_depth,
            dlq_size: self.store.list_dlq().await?.len(),
            active_goal: self.store.active_goal().await?,
            last_tick: self.last_tick.lock().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Plan, PlanExecution, PlanOptions, PlanStatus, RulePolicyEngine};
    use crate::error::PlannerError;
    use async_trait::async_trait;
    use autogoal_store::MemoryGoalStore;
    use autogoal_types::{GoalSignalSnapshot, TxPoolTrend};

    struct Fixed(GoalSignalSnapshot);

    #[async_trait]
    impl SignalSource for Fixed {
        async fn collect(&self) -> Result<GoalSignalSnapshot, AutonomyError> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl SignalSource for Down {
        async fn collect(&self) -> Result<GoalSignalSnapshot, AutonomyError> {
            Err(AutonomyError::SignalCollection("metrics endpoint unreachable".into()))
        }
    }

    struct AlwaysCompletes;

    #[async_trait]
    impl GoalPlanner for AlwaysCompletes {
        async fn plan_and_execute(&self, _goal: &str, _options: &PlanOptions) -> Result<PlanExecution, PlannerError> {
            Ok(PlanExecution {
                plan: Plan {
                    plan_id: "p".into(),
                    status: PlanStatus::Completed,
                    steps: vec![],
                },
                execution_log: vec![],
            })
        }
    }

    fn engine(source: Arc<dyn SignalSource>) -> GoalAutonomyEngine {
        GoalAutonomyEngine::new(
            AutonomyConfig::default(),
            Arc::new(MemoryGoalStore::new()),
            source,
            Arc::new(RulePolicyEngine::default()),
            Arc::new(AlwaysCompletes),
        )
        .unwrap()
    }

    fn snapshot(now: DateTime<Utc>) -> GoalSignalSnapshot {
        let mut snap = GoalSignalSnapshot::new("snap-1", "optimism", now);
        snap.metrics.cpu_usage = 80.0;
        snap.metrics.tx_pool_trend = TxPoolTrend::Rising;
        snap.failover.recent_count = 1;
        snap
    }

    #[tokio::test]
    async fn tick_persists_and_second_tick_dedups() {
        let now = Utc::now();
        let engine = engine(Arc::new(Fixed(snapshot(now))));

        let first = engine.run_generation_tick(Some(now)).await.unwrap();
        assert_eq!(first.generated, 2);
        assert_eq!(first.queued, 2);
        assert_eq!(first.enhancer_fallback, Some(FallbackReason::Disabled));

        let second = engine.run_generation_tick(Some(now)).await.unwrap();
        assert_eq!(second.queued, 0);
        assert_eq!(second.suppressed, 2);

        let state = engine.state().await.unwrap();
        assert_eq!(state.queue_depth.queued, 2);
        assert_eq!(state.dlq_size, 0);
        assert_eq!(state.last_tick, Some(second));
        assert_eq!(engine.store().list_suppressions(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_after_tick_completes_a_goal() {
        let now = Utc::now();
        let engine = engine(Arc::new(Fixed(snapshot(now))));
        engine.run_generation_tick(Some(now)).await.unwrap();

        let outcome = engine.dispatch(DispatchOptions::at(now)).await;
        assert!(outcome.dispatched);

        let state = engine.state().await.unwrap();
        assert_eq!(state.queue_depth.total(), 2);
        assert!(state.active_goal.is_none());
    }

    #[tokio::test]
    async fn collection_failure_propagates() {
        let err = engine(Arc::new(Down)).run_generation_tick(None).await.unwrap_err();
        assert!(matches!(err, AutonomyError::SignalCollection(_)));
        assert!(err.is_retryable());
    }
}
