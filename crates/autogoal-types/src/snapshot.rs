//! Signal snapshot
//!
//! A point-in-time read of the cluster's operational state. Produced by an
//! external collector, immutable once produced, and referenced by id from
//! every candidate derived from it.

use crate::candidate::GoalSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Direction of the transaction pool over the sampling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPoolTrend {
    Rising,
    Falling,
    #[default]
    Stable,
}

/// Node resource and mempool metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSignal {
    /// CPU usage percent (0-100)
    pub cpu_usage: f64,
    /// Memory usage percent (0-100)
    pub memory_usage: f64,
    /// Pending transactions in the pool
    pub tx_pool_pending: u64,
    pub tx_pool_trend: TxPoolTrend,
    /// Latest observed L2 block height
    pub l2_block_height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub active_count: u32,
    pub critical_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverSignal {
    /// Failover events inside the recent window
    pub recent_count: u32,
    pub active_endpoint: Option<String>,
}

/// Aggregated cost/utilization history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSignal {
    pub avg_vcpu: f64,
    /// Average utilization percent across the window
    pub avg_utilization: f64,
    pub data_point_count: u32,
}

/// Incident memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySignal {
    pub recent_incident_count: u32,
    pub recent_high_severity_count: u32,
}

/// Safety / scaling policy state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySignal {
    pub read_only_mode: bool,
    pub auto_scaling_enabled: bool,
    /// Remaining scaling cooldown
    pub cooldown_remaining_seconds: u64,
}

impl Default for PolicySignal {
    fn default() -> Self {
        Self {
            read_only_mode: false,
            auto_scaling_enabled: true,
            cooldown_remaining_seconds: 0,
        }
    }
}

/// Immutable point-in-time signal snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSignalSnapshot {
    pub snapshot_id: String,
    pub collected_at: DateTime<Utc>,
    /// Chain flavour (e.g. "optimism", "arbitrum")
    pub chain_type: String,
    pub sources: BTreeSet<GoalSource>,
    pub metrics: MetricsSignal,
    pub anomalies: AnomalySignal,
    pub failover: FailoverSignal,
    pub cost: CostSignal,
    pub memory: MemorySignal,
    pub policy: PolicySignal,
}

impl GoalSignalSnapshot {
    /// Create an empty snapshot for a chain, collected at `collected_at`
    #[must_use]
    pub fn new(
        snapshot_id: impl Into<String>,
        chain_type: impl Into<String>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            collected_at,
            chain_type: chain_type.into(),
            sources: BTreeSet::new(),
            metrics: MetricsSignal::default(),
            anomalies: AnomalySignal::default(),
            failover: FailoverSignal::default(),
            cost: CostSignal::default(),
            memory: MemorySignal::default(),
            policy: PolicySignal::default(),
        }
    }

    /// Age of the snapshot relative to `now` (zero if collected in the future)
    #[inline]
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.collected_at).max(chrono::Duration::zero())
    }

    /// One-line summary used in prompts and logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "chain={} cpu={:.1} txpool={} ({:?}) anomalies={}/{} failovers={} incidents={} readOnly={} autoscaling={} cooldown={}s",
            self.chain_type,
            self.metrics.cpu_usage,
            self.metrics.tx_pool_pending,
            self.metrics.tx_pool_trend,
            self.anomalies.active_count,
            self.anomalies.critical_count,
            self.failover.recent_count,
            self.memory.recent_incident_count,
            self.policy.read_only_mode,
            self.policy.auto_scaling_enabled,
            self.policy.cooldown_remaining_seconds,
        )
    }
}
