//! Dispatch simulation
//!
//! Generates a pseudo-random signal snapshot per tick from a seed, runs a
//! generation tick, then dispatches until the queue has nothing due. Ticks
//! are five simulated minutes apart so backoff and TTLs play out.

use crate::fixtures::{SimulatedPlanner, SnapshotSource, CHAIN};
use anyhow::Result;
use autogoal_core::{AutonomyConfig, DispatchOptions, DispatchReason, GoalAutonomyEngine, QueueDepth, RulePolicyEngine};
use autogoal_store::MemoryGoalStore;
use autogoal_types::{GoalSignalSnapshot, GoalSource, TxPoolTrend};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const TICK_MINUTES: i64 = 5;
const MAX_DISPATCHES_PER_TICK: usize = 16;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SimulationOptions {
    pub ticks: u32,
    pub failure_every: u64,
    pub seed: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct SimulationReport {
    pub seed: u64,
    pub ticks: u32,
    pub generated: usize,
    pub queued: usize,
    pub suppressed: usize,
    pub planner_calls: u64,
    /// Dispatch outcomes by reason
    pub dispatches: BTreeMap<String, usize>,
    pub queue_depth: QueueDepth,
    pub dlq_size: usize,
}

impl SimulationReport {
    pub(crate) fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Autogoal Simulation ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.seed));
        report.push_str(&format!("Ticks: {}\n", self.ticks));
        report.push_str(&format!("Candidates Generated: {}\n", self.generated));
        report.push_str(&format!("Goals Queued: {}\n", self.queued));
        report.push_str(&format!("Candidates Suppressed: {}\n", self.suppressed));
        report.push_str(&format!("Planner Calls: {}\n", self.planner_calls));
        report.push_str("\nDispatch Outcomes:\n");
        for (reason, count) in &self.dispatches {
            report.push_str(&format!("  {reason}: {count}\n"));
        }
        let d = &self.queue_depth;
        report.push_str("\nQueue Depth:\n");
        report.push_str(&format!(
            "  queued={} scheduled={} running={} completed={} failed={} dlq={} expired={}\n",
            d.queued, d.scheduled, d.running, d.completed, d.failed, d.dlq, d.expired
        ));
        report.push_str(&format!("DLQ Size: {}\n", self.dlq_size));
        report
    }
}

fn random_snapshot(rng: &mut StdRng, tick: u32, now: DateTime<Utc>) -> GoalSignalSnapshot {
    let mut snap = GoalSignalSnapshot::new(format!("sim-{tick}"), CHAIN, now);
    snap.sources = [GoalSource::Metrics, GoalSource::Anomaly, GoalSource::Failover, GoalSource::Policy]
        .into_iter()
        .collect();

    snap.metrics.cpu_usage = rng.random_range(15.0..98.0);
    snap.metrics.memory_usage = rng.random_range(20.0..90.0);
    snap.metrics.tx_pool_pending = rng.random_range(0..3_000);
    snap.metrics.tx_pool_trend = match rng.random_range(0..3) {
        0 => TxPoolTrend::Falling,
        1 => TxPoolTrend::Stable,
        _ => TxPoolTrend::Rising,
    };
    if rng.random_bool(0.3) {
        snap.anomalies.active_count = rng.random_range(1..4);
        snap.anomalies.critical_count = u32::from(rng.random_bool(0.3));
    }
    if rng.random_bool(0.15) {
        snap.failover.recent_count = rng.random_range(1..3);
        snap.failover.active_endpoint = Some("https://rpc-backup.example".to_string());
    }
    snap.cost.avg_vcpu = rng.random_range(1.0..8.0);
    snap.cost.avg_utilization = rng.random_range(10.0..90.0);
    snap.cost.data_point_count = rng.random_range(0..200);
    snap.memory.recent_incident_count = rng.random_range(0..5);
    snap.memory.recent_high_severity_count = rng.random_range(0..3);
    snap.policy.auto_scaling_enabled = rng.random_bool(0.85);
    if rng.random_bool(0.1) {
        snap.policy.cooldown_remaining_seconds = 180;
    }
    snap
}

pub(crate) async fn run(config: AutonomyConfig, options: SimulationOptions) -> Result<SimulationReport> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let start = Utc::now();
    let source = Arc::new(SnapshotSource::new(random_snapshot(&mut rng, 0, start)));
    let planner = Arc::new(SimulatedPlanner::new(options.failure_every));
    let engine = GoalAutonomyEngine::new(
        config,
        Arc::new(MemoryGoalStore::new()),
        source.clone(),
        Arc::new(RulePolicyEngine::default()),
        planner.clone(),
    )?
    .with_worker("simulator");

    let mut report = SimulationReport {
        seed: options.seed,
        ticks: options.ticks,
        ..SimulationReport::default()
    };

    for tick in 0..options.ticks {
        let now = start + Duration::minutes(TICK_MINUTES * i64::from(tick));
        source.set(random_snapshot(&mut rng, tick, now));
        let summary = engine.run_generation_tick(Some(now)).await?;
        report.generated += summary.generated;
        report.queued += summary.queued;
        report.suppressed += summary.suppressed;

        for _ in 0..MAX_DISPATCHES_PER_TICK {
            let outcome = engine.dispatch(DispatchOptions::at(now)).await;
            *report.dispatches.entry(outcome.reason.to_string()).or_default() += 1;
            if matches!(outcome.reason, DispatchReason::QueueEmpty | DispatchReason::StoreError) {
                break;
            }
        }
    }

    let state = engine.state().await?;
    report.queue_depth = state.queue_depth;
    report.dlq_size = state.dlq_size;
    report.planner_calls = planner.calls();
    tracing::info!(
        seed = options.seed,
        ticks = options.ticks,
        dlq = report.dlq_size,
        "simulation finished"
    );
    Ok(report)
}
