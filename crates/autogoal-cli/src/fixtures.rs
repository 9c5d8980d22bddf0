//! In-process collaborators for the eval harness and the simulator

use async_trait::async_trait;
use autogoal_core::{
    AutonomyError, ExecutionLogEntry, GoalPlanner, Plan, PlanExecution, PlanOptions, PlanStatus, PlannerError,
    SignalSource, StepStatus,
};
use autogoal_types::{GoalSignalSnapshot, GoalSource, TxPoolTrend};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const CHAIN: &str = "optimism";

/// cpu=86, txPool=1800 rising, one active and one critical anomaly
pub(crate) fn pressure_snapshot(id: &str, collected_at: DateTime<Utc>) -> GoalSignalSnapshot {
    let mut snap = GoalSignalSnapshot::new(id, CHAIN, collected_at);
    snap.sources = [GoalSource::Metrics, GoalSource::Anomaly, GoalSource::Policy]
        .into_iter()
        .collect();
    snap.metrics.cpu_usage = 86.0;
    snap.metrics.memory_usage = 70.0;
    snap.metrics.tx_pool_pending = 1_800;
    snap.metrics.tx_pool_trend = TxPoolTrend::Rising;
    snap.anomalies.active_count = 1;
    snap.anomalies.critical_count = 1;
    snap
}

/// Signal source returning whatever snapshot was last set
pub(crate) struct SnapshotSource(Mutex<GoalSignalSnapshot>);

impl SnapshotSource {
    pub(crate) fn new(snapshot: GoalSignalSnapshot) -> Self {
        Self(Mutex::new(snapshot))
    }

    pub(crate) fn set(&self, snapshot: GoalSignalSnapshot) {
        *self.0.lock() = snapshot;
    }
}

#[async_trait]
impl SignalSource for SnapshotSource {
    async fn collect(&self) -> Result<GoalSignalSnapshot, AutonomyError> {
        Ok(self.0.lock().clone())
    }
}

/// Planner that fails every `failure_every`-th execution and completes the rest
pub(crate) struct SimulatedPlanner {
    failure_every: u64,
    calls: AtomicU64,
}

impl SimulatedPlanner {
    pub(crate) fn new(failure_every: u64) -> Self {
        Self {
            failure_every,
            calls: AtomicU64::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GoalPlanner for SimulatedPlanner {
    async fn plan_and_execute(&self, goal: &str, options: &PlanOptions) -> Result<PlanExecution, PlannerError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let fails = self.failure_every > 0 && call % self.failure_every == 0;
        let (status, step_status, message) = if fails {
            (PlanStatus::Failed, StepStatus::Failed, format!("simulated failure on call {call}"))
        } else {
            (PlanStatus::Completed, StepStatus::Success, "ok".to_string())
        };
        tracing::debug!(call, goal, dry_run = options.dry_run, fails, "simulated plan");
        Ok(PlanExecution {
            plan: Plan {
                plan_id: format!("sim-{call}"),
                status,
                steps: vec![],
            },
            execution_log: vec![ExecutionLogEntry {
                step_id: "remediate".into(),
                action: "remediate".into(),
                status: step_status,
                message,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_third_call_fails() {
        let planner = SimulatedPlanner::new(3);
        let options = PlanOptions {
            dry_run: true,
            allow_writes: false,
            initiated_by: "test".into(),
        };
        let mut statuses = Vec::new();
        for _ in 0..6 {
            let run = planner.plan_and_execute("goal", &options).await.unwrap();
            statuses.push(run.plan.status);
        }
        assert_eq!(statuses.iter().filter(|s| **s == PlanStatus::Failed).count(), 2);
        assert_eq!(statuses[2], PlanStatus::Failed);
        assert_eq!(planner.calls(), 6);
    }
}
