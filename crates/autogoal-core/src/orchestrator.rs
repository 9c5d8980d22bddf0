//! Goal orchestrator
//!
//! Dispatches one queue item per call through the state machine:
//!
//! ```text
//! select -> scheduled -> lease -> idempotency -> running -> policy -> plan
//!   completed            => completed, episode, release
//!   failed / exception   => requeued with backoff, or dlq when retries run out
//! ```
//!
//! Every path returns a [`DispatchOutcome`]; nothing is re-thrown to the
//! caller. Store failures become `store_error` outcomes after a best-effort
//! release of whatever this call acquired.

use crate::api::{
    EpisodeOutcome, EpisodeStage, GoalPlanner, LearningEpisode, LearningRecorder, PlanOptions, PolicyEngine,
    PolicyRequest, PolicyVerdict, TracingLearningRecorder,
};
use crate::config::OrchestratorConfig;
use autogoal_store::{GoalStore, LeaseAcquisition, StoreError};
use autogoal_types::{
    AutonomousGoalQueueItem, CheckpointPhase, DlqReason, GoalDlqItem, GoalExecutionCheckpoint, GoalId,
    GoalIdempotencyRecord, GoalLeaseRecord, IdempotencyKey, OwnerId, QueueStatus, RecordId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Per-call dispatch options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Clock override; wall clock when `None`
    pub now: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub allow_writes: bool,
    pub read_only_mode: bool,
    pub initiated_by: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            now: None,
            dry_run: false,
            allow_writes: false,
            read_only_mode: false,
            initiated_by: "goal-orchestrator".to_string(),
        }
    }
}

impl DispatchOptions {
    #[inline]
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Some(now),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_allow_writes(mut self, allow_writes: bool) -> Self {
        self.allow_writes = allow_writes;
        self
    }
}

/// Why a dispatch call ended where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    QueueEmpty,
    LeaseActive,
    IdempotencyDuplicate,
    PolicyDenied,
    ApprovalRequired,
    Completed,
    Requeued,
    MaxRetriesExceeded,
    RuntimeException,
    StoreError,
}

impl DispatchReason {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QueueEmpty => "queue_empty",
            Self::LeaseActive => "lease_active",
            Self::IdempotencyDuplicate => "idempotency_duplicate",
            Self::PolicyDenied => "policy_denied",
            Self::ApprovalRequired => "approval_required",
            Self::Completed => "completed",
            Self::Requeued => "requeued",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::RuntimeException => "runtime_exception",
            Self::StoreError => "store_error",
        }
    }
}

impl fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one dispatch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Whether this call took ownership of a goal
    pub dispatched: bool,
    pub goal_id: Option<GoalId>,
    pub status: Option<QueueStatus>,
    pub reason: DispatchReason,
    /// Policy engine reason code when the policy stopped the goal
    pub policy_reason_code: Option<String>,
    pub plan_id: Option<String>,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl DispatchOutcome {
    fn idle(reason: DispatchReason) -> Self {
        Self {
            dispatched: false,
            goal_id: None,
            status: None,
            reason,
            policy_reason_code: None,
            plan_id: None,
            attempts: 0,
            next_attempt_at: None,
            message: None,
        }
    }

    fn for_item(item: &AutonomousGoalQueueItem, dispatched: bool, reason: DispatchReason) -> Self {
        Self {
            dispatched,
            goal_id: Some(item.goal_id),
            status: Some(item.status),
            reason,
            policy_reason_code: None,
            plan_id: item.plan_id.clone(),
            attempts: item.attempts,
            next_attempt_at: item.next_attempt_at,
            message: item.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayReason {
    Replayed,
    DlqItemNotFound,
    StoreError,
}

/// Structured result of a DLQ replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub replayed: bool,
    pub goal_id: GoalId,
    pub reason: ReplayReason,
    pub status: Option<QueueStatus>,
    pub message: Option<String>,
}

/// Counts from one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub recovered: usize,
}

/// Goal this call holds a lease on; released if the call bails out
struct Held {
    goal_id: GoalId,
    owner: OwnerId,
}

/// Dispatches queued goals to the planner with leases, idempotency,
/// checkpoints, retry/backoff and a dead-letter queue
pub struct GoalOrchestrator {
    store: Arc<dyn GoalStore>,
    policy: Arc<dyn PolicyEngine>,
    planner: Arc<dyn GoalPlanner>,
    learner: Arc<dyn LearningRecorder>,
    config: OrchestratorConfig,
    replay_ttl: Duration,
    worker: String,
}

impl fmt::Debug for GoalOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalOrchestrator")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl GoalOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn GoalStore>,
        policy: Arc<dyn PolicyEngine>,
        planner: Arc<dyn GoalPlanner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            policy,
            planner,
            learner: Arc::new(TracingLearningRecorder),
            config: config.clamped(),
            replay_ttl: Duration::minutes(60),
            worker: "worker".to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_learner(mut self, learner: Arc<dyn LearningRecorder>) -> Self {
        self.learner = learner;
        self
    }

    /// Worker label embedded in every owner id
    #[inline]
    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    /// Lifetime granted to a goal rebuilt from the DLQ
    #[inline]
    #[must_use]
    pub fn with_replay_ttl(mut self, ttl: Duration) -> Self {
        self.replay_ttl = ttl;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GoalStore> {
        &self.store
    }

    /// Dispatch the next due goal
    pub async fn dispatch_next_goal(&self, options: DispatchOptions) -> DispatchOutcome {
        let now = options.now.unwrap_or_else(Utc::now);
        let span = tracing::info_span!("dispatch", worker = %self.worker);
        async move {
            let mut held = None;
            let outcome = match self.dispatch(&options, now, &mut held).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(%error, "dispatch aborted by store failure");
                    let mut outcome = DispatchOutcome::idle(DispatchReason::StoreError);
                    outcome.message = Some(error.to_string());
                    if let Some(Held { goal_id, owner }) = held {
                        outcome.goal_id = Some(goal_id);
                        if let Err(release_error) = self.store.release_goal(goal_id, Some(&owner)).await {
                            tracing::warn!(%goal_id, error = %release_error, "lease release failed");
                        }
                    }
                    outcome
                }
            };
            tracing::info!(
                reason = %outcome.reason,
                dispatched = outcome.dispatched,
                goal_id = ?outcome.goal_id,
                attempts = outcome.attempts,
                "dispatch finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        options: &DispatchOptions,
        now: DateTime<Utc>,
        held: &mut Option<Held>,
    ) -> Result<DispatchOutcome, StoreError> {
        let started = Instant::now();
        self.run_maintenance(now).await?;

        // 1. select
        let Some(mut item) = self.store.next_due_goal(now).await? else {
            return Ok(DispatchOutcome::idle(DispatchReason::QueueEmpty));
        };
        let goal_id = item.goal_id;

        // 2. scheduled
        item.status = QueueStatus::Scheduled;
        item.scheduled_at = Some(now);
        item.metadata.dispatch_worker = Some(self.worker.clone());
        if !self.store.compare_and_update_queue_item(&item, QueueStatus::Queued).await? {
            tracing::debug!(%goal_id, "goal taken by another worker before scheduling");
            return Ok(DispatchOutcome {
                goal_id: Some(goal_id),
                ..DispatchOutcome::idle(DispatchReason::LeaseActive)
            });
        }
        self.checkpoint(&item, CheckpointPhase::Scheduled, None, "scheduled for dispatch", now)
            .await?;

        // 3. lease
        let owner = OwnerId::generate(&self.worker);
        let lease = match self
            .store
            .try_acquire_lease(goal_id, &owner, now, self.config.lease_ttl())
            .await?
        {
            LeaseAcquisition::Acquired(lease) => lease,
            LeaseAcquisition::Held(existing) => {
                tracing::warn!(%goal_id, holder = %existing.owner_id, "lease held by another worker");
                return Ok(DispatchOutcome::for_item(&item, false, DispatchReason::LeaseActive));
            }
        };
        *held = Some(Held {
            goal_id,
            owner: owner.clone(),
        });
        self.store.set_active_goal(goal_id).await?;
        item.lease_owner = Some(owner.clone());
        item.lease_expires_at = Some(lease.lease_expires_at);
        item.metadata.lease_version = Some(lease.version);
        self.checkpoint(
            &item,
            CheckpointPhase::LeaseAcquired,
            Some(&owner),
            &format!("lease v{} until {}", lease.version, lease.lease_expires_at),
            now,
        )
        .await?;

        // 4. idempotency
        let key = IdempotencyKey::derive(goal_id, &item.signature, options.dry_run, options.allow_writes);
        let registered = self
            .store
            .register_idempotency(
                GoalIdempotencyRecord {
                    key: key.clone(),
                    goal_id,
                    owner_id: owner.clone(),
                    created_at: now,
                    expires_at: now + self.config.idempotency_ttl(),
                },
                now,
            )
            .await?;
        if !registered {
            tracing::warn!(%goal_id, key = %key, "equivalent dispatch already registered");
            let reason = DispatchReason::IdempotencyDuplicate;
            self.fail_item(&mut item, reason.as_str(), reason.as_str(), &owner, now).await?;
            self.release(goal_id, held).await?;
            return Ok(DispatchOutcome::for_item(&item, true, reason));
        }

        // 5. running
        item.status = QueueStatus::Running;
        item.started_at = Some(now);
        item.attempts += 1;
        item.idempotency_key = Some(key);
        self.store.update_queue_item(&item).await?;

        // 6. policy
        self.checkpoint(&item, CheckpointPhase::PolicyCheck, Some(&owner), "evaluating policy", now)
            .await?;
        let decision = self
            .policy
            .evaluate(&PolicyRequest {
                auto_execute: true,
                allow_writes: options.allow_writes,
                read_only_mode: options.read_only_mode,
                risk: item.risk,
                confidence: item.confidence,
            })
            .await;
        if decision.decision != PolicyVerdict::Allow {
            let reason = if decision.decision == PolicyVerdict::Deny {
                DispatchReason::PolicyDenied
            } else {
                DispatchReason::ApprovalRequired
            };
            tracing::info!(%goal_id, reason_code = %decision.reason_code, verdict = ?decision.decision, "policy stopped goal");
            self.fail_item(&mut item, &decision.message, &decision.reason_code, &owner, now)
                .await?;
            self.release(goal_id, held).await?;
            let mut outcome = DispatchOutcome::for_item(&item, true, reason);
            outcome.policy_reason_code = Some(decision.reason_code);
            return Ok(outcome);
        }

        // 7. execute
        self.checkpoint(&item, CheckpointPhase::PlanStarted, Some(&owner), "plan started", now)
            .await?;
        let plan_options = PlanOptions {
            dry_run: options.dry_run,
            allow_writes: options.allow_writes,
            initiated_by: options.initiated_by.clone(),
        };
        let result = self.planner.plan_and_execute(&item.goal, &plan_options).await;

        // 8. outcome
        match result {
            Ok(execution) if execution.is_completed() => {
                item.plan_id = Some(execution.plan.plan_id.clone());
                self.checkpoint(&item, CheckpointPhase::PlanCompleted, Some(&owner), "plan completed", now)
                    .await?;
                item.status = QueueStatus::Completed;
                item.finished_at = Some(now);
                item.last_error = None;
                item.lease_owner = None;
                item.lease_expires_at = None;
                self.store.update_queue_item(&item).await?;
                self.checkpoint(&item, CheckpointPhase::VerifyCompleted, Some(&owner), "verified", now)
                    .await?;
                self.emit_episode(&item, EpisodeOutcome::Completed, started, now).await;
                self.release(goal_id, held).await?;
                Ok(DispatchOutcome::for_item(&item, true, DispatchReason::Completed))
            }
            Ok(execution) => {
                item.plan_id = Some(execution.plan.plan_id.clone());
                let error = execution
                    .first_failure()
                    .map_or_else(|| "plan failed".to_string(), str::to_string);
                self.handle_failure(item, error, DlqReason::MaxRetriesExceeded, &owner, started, now, held)
                    .await
            }
            Err(exception) => {
                tracing::warn!(%goal_id, error = %exception, "planner raised an exception");
                self.handle_failure(
                    item,
                    exception.to_string(),
                    DlqReason::RuntimeException,
                    &owner,
                    started,
                    now,
                    held,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        mut item: AutonomousGoalQueueItem,
        error: String,
        dlq_reason: DlqReason,
        owner: &OwnerId,
        started: Instant,
        now: DateTime<Utc>,
        held: &mut Option<Held>,
    ) -> Result<DispatchOutcome, StoreError> {
        let goal_id = item.goal_id;
        let failed_attempts = item.attempts;

        if failed_attempts > self.config.max_retries {
            item.status = QueueStatus::Dlq;
            item.finished_at = Some(now);
            item.last_error = Some(error.clone());
            item.metadata.failure_reason = Some(dlq_reason.as_str().to_string());
            item.lease_owner = None;
            item.lease_expires_at = None;
            self.store.update_queue_item(&item).await?;
            self.store
                .push_dlq(GoalDlqItem {
                    id: RecordId::new(),
                    goal_id,
                    moved_at: now,
                    reason: dlq_reason,
                    attempts: failed_attempts,
                    last_error: Some(error.clone()),
                    queue_item: item.clone(),
                })
                .await?;
            self.checkpoint(&item, CheckpointPhase::Dlq, Some(owner), &error, now).await?;
            tracing::info!(%goal_id, attempts = failed_attempts, reason = dlq_reason.as_str(), "goal moved to dlq");
            self.emit_episode(&item, EpisodeOutcome::DeadLettered, started, now).await;
            self.release(goal_id, held).await?;
            let reason = match dlq_reason {
                DlqReason::MaxRetriesExceeded => DispatchReason::MaxRetriesExceeded,
                DlqReason::RuntimeException => DispatchReason::RuntimeException,
            };
            return Ok(DispatchOutcome::for_item(&item, true, reason));
        }

        let backoff_ms = self.config.backoff_ms(failed_attempts);
        let next_attempt_at = now + Duration::milliseconds(i64::try_from(backoff_ms).unwrap_or(i64::MAX / 2));
        // The retry is a new request; its key must be registrable again.
        if let Some(key) = item.idempotency_key.take() {
            self.store.remove_idempotency(&key).await?;
        }
        item.requeue(next_attempt_at, error.clone());
        item.metadata.failure_reason = Some(
            match dlq_reason {
                DlqReason::MaxRetriesExceeded => "plan_failed",
                DlqReason::RuntimeException => "runtime_exception",
            }
            .to_string(),
        );
        self.store.update_queue_item(&item).await?;
        self.checkpoint(
            &item,
            CheckpointPhase::Requeued,
            Some(owner),
            &format!("retry in {backoff_ms}ms: {error}"),
            now,
        )
        .await?;
        tracing::info!(%goal_id, attempts = failed_attempts, backoff_ms, "goal requeued");
        self.emit_episode(&item, EpisodeOutcome::Requeued, started, now).await;
        self.release(goal_id, held).await?;
        Ok(DispatchOutcome::for_item(&item, true, DispatchReason::Requeued))
    }

    /// Terminal `failed` transition shared by idempotency and policy stops
    async fn fail_item(
        &self,
        item: &mut AutonomousGoalQueueItem,
        message: &str,
        reason_code: &str,
        owner: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        item.status = QueueStatus::Failed;
        item.finished_at = Some(now);
        item.last_error = Some(message.to_string());
        item.metadata.failure_reason = Some(reason_code.to_string());
        item.lease_owner = None;
        item.lease_expires_at = None;
        self.store.update_queue_item(item).await?;
        self.checkpoint(item, CheckpointPhase::Failed, Some(owner), reason_code, now)
            .await
    }

    async fn release(&self, goal_id: GoalId, held: &mut Option<Held>) -> Result<(), StoreError> {
        let owner = held.take().map(|h| h.owner);
        if !self.store.release_goal(goal_id, owner.as_ref()).await? {
            tracing::warn!(%goal_id, "lease reclaimed by another worker before release");
        }
        Ok(())
    }

    async fn checkpoint(
        &self,
        item: &AutonomousGoalQueueItem,
        phase: CheckpointPhase,
        owner: Option<&OwnerId>,
        details: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tracing::debug!(goal_id = %item.goal_id, phase = phase.as_str(), attempts = item.attempts, "checkpoint");
        self.store
            .put_checkpoint(GoalExecutionCheckpoint {
                goal_id: item.goal_id,
                phase,
                timestamp: now,
                details: details.to_string(),
                attempts: item.attempts,
                owner_id: owner.cloned(),
            })
            .await
    }

    async fn emit_episode(
        &self,
        item: &AutonomousGoalQueueItem,
        outcome: EpisodeOutcome,
        started: Instant,
        now: DateTime<Utc>,
    ) {
        let completed = outcome == EpisodeOutcome::Completed;
        self.learner
            .record(LearningEpisode {
                id: RecordId::new(),
                goal_id: item.goal_id,
                stage: EpisodeStage::Dispatch,
                outcome,
                verification_passed: completed,
                rolled_back: false,
                attempts: item.attempts,
                latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                recorded_at: now,
            })
            .await;
    }

    /// Move a dead-lettered goal back into the queue
    pub async fn replay_goal_from_dlq(&self, goal_id: GoalId, now: Option<DateTime<Utc>>) -> ReplayOutcome {
        let now = now.unwrap_or_else(Utc::now);
        match self.replay(goal_id, now).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%goal_id, %error, "replay aborted by store failure");
                ReplayOutcome {
                    replayed: false,
                    goal_id,
                    reason: ReplayReason::StoreError,
                    status: None,
                    message: Some(error.to_string()),
                }
            }
        }
    }

    async fn replay(&self, goal_id: GoalId, now: DateTime<Utc>) -> Result<ReplayOutcome, StoreError> {
        let Some(entry) = self.store.take_dlq(goal_id).await? else {
            return Ok(ReplayOutcome {
                replayed: false,
                goal_id,
                reason: ReplayReason::DlqItemNotFound,
                status: None,
                message: None,
            });
        };

        let mut item = entry.queue_item;
        if let Some(key) = &item.idempotency_key {
            self.store.remove_idempotency(key).await?;
        }
        item.reset_for_replay(now, self.replay_ttl);

        if self.store.get_queue_item(goal_id).await?.is_some() {
            self.store.update_queue_item(&item).await?;
        } else {
            self.store.insert_queue_items(vec![item.clone()]).await?;
        }
        self.store.release_goal(goal_id, None).await?;

        tracing::info!(%goal_id, replay_count = item.metadata.replay_count, "goal replayed from dlq");
        self.learner
            .record(LearningEpisode {
                id: RecordId::new(),
                goal_id,
                stage: EpisodeStage::Replay,
                outcome: EpisodeOutcome::Requeued,
                verification_passed: false,
                rolled_back: false,
                attempts: item.attempts,
                latency_ms: 0,
                recorded_at: now,
            })
            .await;

        Ok(ReplayOutcome {
            replayed: true,
            goal_id,
            reason: ReplayReason::Replayed,
            status: Some(item.status),
            message: entry.last_error,
        })
    }

    /// Expire overdue items and reclaim goals abandoned by crashed workers
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, StoreError> {
        Ok(MaintenanceReport {
            expired: self.expire_stale_items(now).await?,
            recovered: self.recover_abandoned_goals(now).await?,
        })
    }

    /// `queued` items past `expires_at` become `expired`
    pub async fn expire_stale_items(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut expired = 0;
        for mut item in self.store.list_expired_queued(now).await? {
            item.status = QueueStatus::Expired;
            item.finished_at = Some(now);
            item.last_error = Some("expired before dispatch".to_string());
            if self.store.compare_and_update_queue_item(&item, QueueStatus::Queued).await? {
                tracing::info!(goal_id = %item.goal_id, "goal expired");
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Requeue `scheduled` / `running` items whose lease is gone and whose
    /// dispatch began more than one lease TTL ago
    ///
    /// The idempotency record of the abandoned attempt is kept: if that
    /// attempt got past registration, the retry stops as a duplicate.
    pub async fn recover_abandoned_goals(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let ttl = self.config.lease_ttl();
        let mut recovered = 0;
        for mut item in self.store.list_in_flight().await? {
            let began = item.started_at.or(item.scheduled_at).unwrap_or(item.enqueued_at);
            if began + ttl > now {
                continue;
            }
            let stale_owner = match self.store.get_lease(item.goal_id).await? {
                Some(lease) if lease.is_live(now) => continue,
                Some(lease) => Some(lease.owner_id),
                None => None,
            };
            let previous = item.status;
            item.requeue(now, "lease expired before dispatch finished");
            item.scheduled_at = None;
            item.idempotency_key = None;
            if self.store.compare_and_update_queue_item(&item, previous).await? {
                self.store.release_goal(item.goal_id, stale_owner.as_ref()).await?;
                tracing::warn!(goal_id = %item.goal_id, from = %previous, "abandoned goal requeued");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Extend a lease held by `owner`
    pub async fn heartbeat(
        &self,
        goal_id: GoalId,
        owner: &OwnerId,
        now: Option<DateTime<Utc>>,
    ) -> Result<GoalLeaseRecord, StoreError> {
        let now = now.unwrap_or_else(Utc::now);
        let lease = self
            .store
            .heartbeat_lease(goal_id, owner, now, self.config.lease_ttl())
            .await?;
        tracing::debug!(%goal_id, until = %lease.lease_expires_at, "lease extended");
        Ok(lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ExecutionLogEntry, Plan, PlanExecution, PlanStatus, PolicyDecision, StepStatus,
    };
    use crate::error::PlannerError;
    use async_trait::async_trait;
    use autogoal_store::MemoryGoalStore;
    use autogoal_types::{
        AutonomousGoalCandidate, CandidateId, CandidateStatus, GoalIntent, GoalPriorityScore, GoalRisk,
        GoalSignature, GoalSource,
    };
    use mockall::mock;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    mock! {
        Policy {}

        #[async_trait]
        impl PolicyEngine for Policy {
            async fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision;
        }
    }

    enum Step {
        Complete,
        Fail(&'static str),
        Throw(&'static str),
    }

    struct Scripted(Mutex<VecDeque<Step>>);

    impl Scripted {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(steps.into())))
        }
    }

    #[async_trait]
    impl GoalPlanner for Scripted {
        async fn plan_and_execute(&self, _goal: &str, _options: &PlanOptions) -> Result<PlanExecution, PlannerError> {
            let step = self.0.lock().pop_front().unwrap_or(Step::Complete);
            let (status, log) = match step {
                Step::Complete => (PlanStatus::Completed, vec![]),
                Step::Fail(msg) => (
                    PlanStatus::Failed,
                    vec![ExecutionLogEntry {
                        step_id: "s1".into(),
                        action: "scale".into(),
                        status: StepStatus::Failed,
                        message: msg.into(),
                    }],
                ),
                Step::Throw(msg) => return Err(PlannerError::Execution(msg.into())),
            };
            Ok(PlanExecution {
                plan: Plan {
                    plan_id: "plan-1".into(),
                    status,
                    steps: vec![],
                },
                execution_log: log,
            })
        }
    }

    fn allow_all() -> Arc<MockPolicy> {
        let mut policy = MockPolicy::new();
        policy.expect_evaluate().returning(|_| PolicyDecision::allow());
        Arc::new(policy)
    }

    fn queued_item(now: DateTime<Utc>) -> AutonomousGoalQueueItem {
        let candidate = AutonomousGoalCandidate {
            id: CandidateId::new(),
            created_at: now,
            updated_at: now,
            source: GoalSource::Metrics,
            status: CandidateStatus::Queued,
            goal: "Stabilize load".into(),
            intent: GoalIntent::Stabilize,
            risk: GoalRisk::High,
            confidence: 0.8,
            signature: GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "Stabilize load"),
            rationale: "cpu".into(),
            signal_snapshot_id: "snap".into(),
            score: None,
            suppression_reason_code: None,
            metadata: None,
        };
        AutonomousGoalQueueItem::from_candidate(
            &candidate,
            GoalPriorityScore::new(30.0, 20.0, 16.0, 10.0),
            now,
            Duration::minutes(60),
        )
    }

    async fn setup(
        policy: Arc<dyn PolicyEngine>,
        planner: Arc<dyn GoalPlanner>,
        config: OrchestratorConfig,
        now: DateTime<Utc>,
    ) -> (GoalOrchestrator, Arc<MemoryGoalStore>, GoalId) {
        let store = Arc::new(MemoryGoalStore::new());
        let item = queued_item(now);
        let goal_id = item.goal_id;
        store.insert_queue_items(vec![item]).await.unwrap();
        (GoalOrchestrator::new(store.clone(), policy, planner, config), store, goal_id)
    }

    #[tokio::test]
    async fn empty_queue() {
        let store = Arc::new(MemoryGoalStore::new());
        let orch = GoalOrchestrator::new(store, allow_all(), Scripted::new(vec![]), OrchestratorConfig::default());
        let outcome = orch.dispatch_next_goal(DispatchOptions::default()).await;
        assert_eq!(outcome.reason, DispatchReason::QueueEmpty);
        assert!(!outcome.dispatched);
    }

    #[tokio::test]
    async fn completed_dispatch_releases_everything() {
        let now = Utc::now();
        let (orch, store, goal_id) = setup(allow_all(), Scripted::new(vec![]), OrchestratorConfig::default(), now).await;

        let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
        assert_eq!(outcome.reason, DispatchReason::Completed);
        assert_eq!(outcome.status, Some(QueueStatus::Completed));
        assert_eq!(outcome.plan_id.as_deref(), Some("plan-1"));

        let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
        assert_eq!(item.attempts, 1);
        assert!(item.idempotency_key.is_some());
        assert!(store.get_lease(goal_id).await.unwrap().is_none());
        assert!(store.get_checkpoint(goal_id).await.unwrap().is_none());
        assert!(store.active_goal().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn policy_request_carries_goal_fields() {
        let now = Utc::now();
        let mut policy = MockPolicy::new();
        policy
            .expect_evaluate()
            .withf(|req| req.auto_execute && req.allow_writes && req.risk == GoalRisk::High && req.confidence == 0.8)
            .times(1)
            .returning(|_| PolicyDecision::new(PolicyVerdict::Deny, "writes_blocked", "no writes today"));
        let (orch, store, goal_id) = setup(Arc::new(policy), Scripted::new(vec![]), OrchestratorConfig::default(), now).await;

        let outcome = orch
            .dispatch_next_goal(DispatchOptions::at(now).with_allow_writes(true))
            .await;
        assert_eq!(outcome.reason, DispatchReason::PolicyDenied);
        assert_eq!(outcome.status, Some(QueueStatus::Failed));
        assert_eq!(outcome.policy_reason_code.as_deref(), Some("writes_blocked"));

        let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
        assert_eq!(item.metadata.failure_reason.as_deref(), Some("writes_blocked"));
        assert!(store.get_lease(goal_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multi_approval_is_treated_as_approval_required() {
        let now = Utc::now();
        let mut policy = MockPolicy::new();
        policy
            .expect_evaluate()
            .returning(|_| PolicyDecision::new(PolicyVerdict::RequireMultiApproval, "two_person_rule", "needs two"));
        let (orch, _store, _) = setup(Arc::new(policy), Scripted::new(vec![]), OrchestratorConfig::default(), now).await;

        let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
        assert_eq!(outcome.reason, DispatchReason::ApprovalRequired);
        assert_eq!(outcome.status, Some(QueueStatus::Failed));
    }

    #[tokio::test]
    async fn plan_failure_surfaces_first_failed_step() {
        let now = Utc::now();
        let config = OrchestratorConfig::default().with_backoff(1_000, 600_000);
        let (orch, store, goal_id) = setup(allow_all(), Scripted::new(vec![Step::Fail("scale rejected")]), config, now).await;

        let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
        assert_eq!(outcome.reason, DispatchReason::Requeued);
        assert_eq!(outcome.next_attempt_at, Some(now + Duration::milliseconds(1_000)));

        let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
        assert_eq!(item.last_error.as_deref(), Some("scale rejected"));
        assert!(item.idempotency_key.is_none());
        assert!(item.lease_owner.is_none());
    }

    #[tokio::test]
    async fn exception_with_no_retries_lands_in_dlq() {
        let now = Utc::now();
        let config = OrchestratorConfig::default().with_max_retries(0);
        let (orch, store, goal_id) = setup(allow_all(), Scripted::new(vec![Step::Throw("rpc down")]), config, now).await;

        let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
        assert_eq!(outcome.reason, DispatchReason::RuntimeException);
        assert_eq!(outcome.status, Some(QueueStatus::Dlq));

        let dlq = store.list_dlq().await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].reason, DlqReason::RuntimeException);
        assert_eq!(dlq[0].last_error.as_deref(), Some("rpc down"));
        assert_eq!(dlq[0].queue_item.goal_id, goal_id);
    }

    #[tokio::test]
    async fn expired_items_are_not_dispatched() {
        let now = Utc::now();
        let (orch, store, goal_id) = setup(allow_all(), Scripted::new(vec![]), OrchestratorConfig::default(), now).await;

        let later = now + Duration::minutes(61);
        let outcome = orch.dispatch_next_goal(DispatchOptions::at(later)).await;
        assert_eq!(outcome.reason, DispatchReason::QueueEmpty);
        let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Expired);
    }

    #[tokio::test]
    async fn abandoned_running_goal_is_recovered() {
        let now = Utc::now();
        let (orch, store, goal_id) = setup(allow_all(), Scripted::new(vec![]), OrchestratorConfig::default(), now).await;

        let mut item = store.get_queue_item(goal_id).await.unwrap().unwrap();
        item.status = QueueStatus::Running;
        item.started_at = Some(now);
        store.update_queue_item(&item).await.unwrap();
        store
            .try_acquire_lease(goal_id, &OwnerId::generate("crashed"), now, Duration::seconds(120))
            .await
            .unwrap();

        assert_eq!(orch.recover_abandoned_goals(now + Duration::seconds(60)).await.unwrap(), 0);
        assert_eq!(orch.recover_abandoned_goals(now + Duration::seconds(121)).await.unwrap(), 1);

        let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Queued);
        assert!(store.get_lease(goal_id).await.unwrap().is_none());
    }

    /// Planner that runs past its lease while another worker takes it over
    struct Overrun {
        store: Arc<MemoryGoalStore>,
        goal_id: GoalId,
        successor: OwnerId,
        at: DateTime<Utc>,
    }

    #[async_trait]
    impl GoalPlanner for Overrun {
        async fn plan_and_execute(&self, _goal: &str, _options: &PlanOptions) -> Result<PlanExecution, PlannerError> {
            let taken = self
                .store
                .try_acquire_lease(self.goal_id, &self.successor, self.at, Duration::seconds(120))
                .await
                .unwrap();
            assert!(taken.is_acquired());
            Ok(PlanExecution {
                plan: Plan {
                    plan_id: "late".into(),
                    status: PlanStatus::Completed,
                    steps: vec![],
                },
                execution_log: vec![],
            })
        }
    }

    #[tokio::test]
    async fn late_release_keeps_successor_lease() {
        let now = Utc::now();
        let store = Arc::new(MemoryGoalStore::new());
        let item = queued_item(now);
        let goal_id = item.goal_id;
        store.insert_queue_items(vec![item]).await.unwrap();
        let successor = OwnerId::generate("successor");
        let planner = Arc::new(Overrun {
            store: store.clone(),
            goal_id,
            successor: successor.clone(),
            at: now + Duration::minutes(10),
        });
        let orch = GoalOrchestrator::new(store.clone(), allow_all(), planner, OrchestratorConfig::default());

        let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
        assert_eq!(outcome.reason, DispatchReason::Completed);
        let lease = store.get_lease(goal_id).await.unwrap().unwrap();
        assert_eq!(lease.owner_id, successor);
        assert_eq!(lease.version, 2);
    }

    #[tokio::test]
    async fn heartbeat_extends_own_lease_only() {
        let now = Utc::now();
        let (orch, store, goal_id) = setup(allow_all(), Scripted::new(vec![]), OrchestratorConfig::default(), now).await;
        let owner = OwnerId::generate("w1");
        store
            .try_acquire_lease(goal_id, &owner, now, Duration::seconds(120))
            .await
            .unwrap();

        let lease = orch.heartbeat(goal_id, &owner, Some(now + Duration::seconds(60))).await.unwrap();
        assert_eq!(lease.lease_expires_at, now + Duration::seconds(180));
        assert!(orch.heartbeat(goal_id, &OwnerId::generate("w2"), Some(now)).await.is_err());
    }

    #[test]
    fn reasons_use_wire_names() {
        assert_eq!(
            serde_json::to_string(&DispatchReason::IdempotencyDuplicate).unwrap(),
            "\"idempotency_duplicate\""
        );
        assert_eq!(DispatchReason::LeaseActive.to_string(), "lease_active");
        assert_eq!(
            serde_json::to_string(&ReplayReason::DlqItemNotFound).unwrap(),
            "\"dlq_item_not_found\""
        );
    }
}
