//! Orchestrator dispatch properties: backoff, DLQ, idempotency, leases, replay

use autogoal_core::prelude::*;
use autogoal_test_utils::{
    high_pressure_snapshot, orchestrator, PlannerStep, RecordingLearner, ScriptedPlanner, StaticPolicy,
};
use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Admit the high-pressure goal into `store` and return its id
async fn seed(store: &MemoryGoalStore, now: DateTime<Utc>) -> GoalId {
    let snap = high_pressure_snapshot(now);
    let candidates = autogoal_core::candidates::rule_candidates(&snap, now);
    let outcome = PriorityEngine::default().evaluate(PriorityInput {
        snapshot: &snap,
        candidates,
        existing_queue: &[],
        recent_candidates: &[],
        now,
    });
    let goal_id = outcome.queued[0].goal_id;
    store.insert_queue_items(outcome.queued).await.unwrap();
    goal_id
}

fn fast_backoff() -> OrchestratorConfig {
    OrchestratorConfig::default().with_backoff(1_000, 600_000)
}

#[tokio::test]
async fn retry_backoff_doubles_per_failure() {
    let now = Utc::now();
    let planner = ScriptedPlanner::failing(2, "scale rejected");
    let (orch, store) = orchestrator(fast_backoff(), StaticPolicy::allow(), planner.clone());
    let goal_id = seed(&store, now).await;

    let first = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert_eq!(first.reason, DispatchReason::Requeued);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.next_attempt_at, Some(now + Duration::milliseconds(1_000)));

    // not due yet
    let early = orch
        .dispatch_next_goal(DispatchOptions::at(now + Duration::milliseconds(500)))
        .await;
    assert_eq!(early.reason, DispatchReason::QueueEmpty);

    let retry_at = now + Duration::milliseconds(1_000);
    let second = orch.dispatch_next_goal(DispatchOptions::at(retry_at)).await;
    assert_eq!(second.reason, DispatchReason::Requeued);
    assert_eq!(second.attempts, 2);
    assert_eq!(second.next_attempt_at, Some(retry_at + Duration::milliseconds(2_000)));

    let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Queued);
    assert_eq!(item.last_error.as_deref(), Some("scale rejected"));
    assert!(item.started_at.is_none());
    assert!(item.finished_at.is_none());
    assert!(item.lease_owner.is_none());
    assert!(item.lease_expires_at.is_none());
    assert_eq!(planner.call_count(), 2);
}

#[tokio::test]
async fn retries_exhausted_after_max_retries() {
    let now = Utc::now();
    let config = fast_backoff().with_max_retries(1);
    let (orch, store) = orchestrator(config, StaticPolicy::allow(), ScriptedPlanner::failing(5, "still broken"));
    seed(&store, now).await;

    let first = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert_eq!(first.reason, DispatchReason::Requeued);

    let later = now + Duration::seconds(1);
    let second = orch.dispatch_next_goal(DispatchOptions::at(later)).await;
    assert_eq!(second.reason, DispatchReason::MaxRetriesExceeded);
    assert_eq!(second.status, Some(QueueStatus::Dlq));
    assert_eq!(second.attempts, 2);
}

#[tokio::test]
async fn zero_retries_moves_straight_to_dlq() {
    let now = Utc::now();
    let config = OrchestratorConfig::default().with_max_retries(0);
    let (orch, store) = orchestrator(config, StaticPolicy::allow(), ScriptedPlanner::failing(1, "rollout failed"));
    let goal_id = seed(&store, now).await;
    let before = store.list_dlq().await.unwrap().len();

    let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert!(outcome.dispatched);
    assert_eq!(outcome.status, Some(QueueStatus::Dlq));
    assert_eq!(outcome.reason, DispatchReason::MaxRetriesExceeded);

    let dlq = store.list_dlq().await.unwrap();
    assert_eq!(dlq.len(), before + 1);
    let entry = &dlq[0];
    assert_eq!(entry.goal_id, goal_id);
    assert_eq!(entry.reason, DlqReason::MaxRetriesExceeded);
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.queue_item.goal_id, goal_id);
    assert_eq!(entry.queue_item.last_error.as_deref(), Some("rollout failed"));

    assert!(store.get_lease(goal_id).await.unwrap().is_none());
    assert!(store.get_checkpoint(goal_id).await.unwrap().is_none());
    assert!(store.active_goal().await.unwrap().is_none());
}

#[tokio::test]
async fn equivalent_dispatch_is_an_idempotency_duplicate() {
    let now = Utc::now();
    let planner = ScriptedPlanner::completing();
    let (orch, store) = orchestrator(OrchestratorConfig::default(), StaticPolicy::allow(), planner.clone());
    let goal_id = seed(&store, now).await;

    let first = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert_eq!(first.reason, DispatchReason::Completed);

    // Put the same goal back as if an upstream re-enqueued it.
    let mut item = store.get_queue_item(goal_id).await.unwrap().unwrap();
    item.status = QueueStatus::Queued;
    item.next_attempt_at = None;
    store.update_queue_item(&item).await.unwrap();

    let later = now + Duration::seconds(5);
    let second = orch.dispatch_next_goal(DispatchOptions::at(later)).await;
    assert!(second.dispatched);
    assert_eq!(second.status, Some(QueueStatus::Failed));
    assert_eq!(second.reason, DispatchReason::IdempotencyDuplicate);
    assert_eq!(planner.call_count(), 1);
    assert!(store.get_lease(goal_id).await.unwrap().is_none());
}

#[tokio::test]
async fn different_flags_are_a_different_request() {
    let now = Utc::now();
    let (orch, store) = orchestrator(OrchestratorConfig::default(), StaticPolicy::allow(), ScriptedPlanner::completing());
    let goal_id = seed(&store, now).await;

    orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    let mut item = store.get_queue_item(goal_id).await.unwrap().unwrap();
    item.status = QueueStatus::Queued;
    store.update_queue_item(&item).await.unwrap();

    let dry = orch
        .dispatch_next_goal(DispatchOptions::at(now).with_dry_run(true))
        .await;
    assert_eq!(dry.reason, DispatchReason::Completed);
}

#[tokio::test]
async fn live_lease_blocks_second_worker() {
    let now = Utc::now();
    let planner = ScriptedPlanner::completing();
    let (orch, store) = orchestrator(OrchestratorConfig::default(), StaticPolicy::allow(), planner.clone());
    let goal_id = seed(&store, now).await;
    let other = OwnerId::generate("other-worker");
    store
        .try_acquire_lease(goal_id, &other, now, Duration::seconds(120))
        .await
        .unwrap();

    let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert!(!outcome.dispatched);
    assert_eq!(outcome.reason, DispatchReason::LeaseActive);
    assert_eq!(outcome.status, Some(QueueStatus::Scheduled));

    let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Scheduled);
    assert_eq!(item.attempts, 0);
    assert_eq!(planner.call_count(), 0);
    assert_eq!(store.get_lease(goal_id).await.unwrap().unwrap().owner_id, other);
}

#[tokio::test]
async fn expired_lease_lets_a_worker_reclaim_the_goal() {
    let now = Utc::now();
    let (orch, store) = orchestrator(OrchestratorConfig::default(), StaticPolicy::allow(), ScriptedPlanner::completing());
    let goal_id = seed(&store, now).await;
    store
        .try_acquire_lease(goal_id, &OwnerId::generate("crashed"), now, Duration::seconds(120))
        .await
        .unwrap();
    let blocked = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert_eq!(blocked.reason, DispatchReason::LeaseActive);

    let after_ttl = now + Duration::seconds(121);
    let reclaimed = orch.dispatch_next_goal(DispatchOptions::at(after_ttl)).await;
    assert_eq!(reclaimed.reason, DispatchReason::Completed);
    assert_eq!(reclaimed.goal_id, Some(goal_id));
}

#[tokio::test]
async fn replay_requeues_once() {
    let now = Utc::now();
    let config = OrchestratorConfig::default().with_max_retries(0);
    let planner = ScriptedPlanner::new([PlannerStep::Throw("rpc timeout".into())]);
    let (orch, store) = orchestrator(config, StaticPolicy::allow(), planner);
    let goal_id = seed(&store, now).await;

    let failed = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert_eq!(failed.reason, DispatchReason::RuntimeException);

    let replay_at = now + Duration::minutes(5);
    let replay = orch.replay_goal_from_dlq(goal_id, Some(replay_at)).await;
    assert!(replay.replayed);
    assert_eq!(replay.reason, ReplayReason::Replayed);
    assert_eq!(replay.message.as_deref(), Some("rpc timeout"));

    let item = store.get_queue_item(goal_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Queued);
    assert!(item.next_attempt_at.unwrap() <= replay_at);
    assert!(item.last_error.is_none());
    assert!(item.lease_owner.is_none());
    assert!(item.started_at.is_none());
    assert_eq!(item.metadata.replay_count, 1);
    assert!(store.list_dlq().await.unwrap().is_empty());

    let again = orch.replay_goal_from_dlq(goal_id, Some(replay_at)).await;
    assert!(!again.replayed);
    assert_eq!(again.reason, ReplayReason::DlqItemNotFound);

    // the replayed goal is dispatchable again; its old idempotency key is gone
    let rerun = orch.dispatch_next_goal(DispatchOptions::at(replay_at)).await;
    assert_eq!(rerun.reason, DispatchReason::Completed);
}

#[tokio::test]
async fn replayed_goal_gets_a_fresh_retry_budget() {
    let now = Utc::now();
    let planner = ScriptedPlanner::new([
        PlannerStep::Fail("first".into()),
        PlannerStep::Fail("second".into()),
        PlannerStep::Fail("after replay".into()),
    ]);
    let (orch, store) = orchestrator(fast_backoff().with_max_retries(1), StaticPolicy::allow(), planner);
    let goal_id = seed(&store, now).await;

    orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    let dead = orch.dispatch_next_goal(DispatchOptions::at(now + Duration::seconds(2))).await;
    assert_eq!(dead.reason, DispatchReason::MaxRetriesExceeded);
    assert_eq!(store.list_dlq().await.unwrap()[0].attempts, 2);

    let replay_at = now + Duration::seconds(3);
    assert!(orch.replay_goal_from_dlq(goal_id, Some(replay_at)).await.replayed);
    assert_eq!(store.get_queue_item(goal_id).await.unwrap().unwrap().attempts, 0);

    let retried = orch.dispatch_next_goal(DispatchOptions::at(replay_at)).await;
    assert_eq!(retried.reason, DispatchReason::Requeued);
    assert_eq!(retried.attempts, 1);
    assert!(store.list_dlq().await.unwrap().is_empty());
}

#[tokio::test]
async fn replay_of_unknown_goal_is_not_found() {
    let (orch, _store) = orchestrator(OrchestratorConfig::default(), StaticPolicy::allow(), ScriptedPlanner::completing());
    let outcome = orch.replay_goal_from_dlq(GoalId::new(), None).await;
    assert_eq!(outcome.reason, ReplayReason::DlqItemNotFound);
}

#[tokio::test]
async fn episodes_follow_outcomes() {
    let now = Utc::now();
    let learner = RecordingLearner::new();
    let config = fast_backoff().with_max_retries(1);
    let planner = ScriptedPlanner::new([PlannerStep::Fail("first".into()), PlannerStep::Fail("second".into())]);
    let (orch, store) = orchestrator(config, StaticPolicy::allow(), planner);
    let orch = orch.with_learner(learner.clone());
    seed(&store, now).await;

    orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    orch.dispatch_next_goal(DispatchOptions::at(now + Duration::seconds(2))).await;

    let outcomes: Vec<_> = learner.episodes().iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, vec![EpisodeOutcome::Requeued, EpisodeOutcome::DeadLettered]);
    assert!(learner.episodes().iter().all(|e| !e.verification_passed));
}

#[tokio::test]
async fn dispatch_flags_reach_policy_and_planner() {
    let now = Utc::now();
    let policy = StaticPolicy::allow();
    let planner = ScriptedPlanner::completing();
    let (orch, store) = orchestrator(OrchestratorConfig::default(), policy.clone(), planner.clone());
    seed(&store, now).await;

    let options = DispatchOptions {
        read_only_mode: true,
        initiated_by: "scheduler".to_string(),
        ..DispatchOptions::at(now).with_allow_writes(true).with_dry_run(true)
    };
    orch.dispatch_next_goal(options).await;

    let request = &policy.requests()[0];
    assert!(request.auto_execute);
    assert!(request.allow_writes);
    assert!(request.read_only_mode);
    assert_eq!(request.risk, GoalRisk::Critical);

    let (_, plan_options) = &planner.calls()[0];
    assert!(plan_options.dry_run);
    assert_eq!(plan_options.initiated_by, "scheduler");
}

#[tokio::test]
async fn denied_goal_is_failed_and_released() {
    let now = Utc::now();
    let (orch, store) = orchestrator(
        OrchestratorConfig::default(),
        StaticPolicy::deny("read_only_write_blocked"),
        ScriptedPlanner::completing(),
    );
    let goal_id = seed(&store, now).await;

    let outcome = orch.dispatch_next_goal(DispatchOptions::at(now)).await;
    assert_eq!(outcome.reason, DispatchReason::PolicyDenied);
    assert_eq!(outcome.policy_reason_code.as_deref(), Some("read_only_write_blocked"));
    assert!(store.active_goal().await.unwrap().is_none());
    assert!(store.get_lease(goal_id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_run_a_goal_once() {
    let now = Utc::now();
    let planner = ScriptedPlanner::completing();
    let (orch, store) = orchestrator(OrchestratorConfig::default(), StaticPolicy::allow(), planner.clone());
    seed(&store, now).await;
    let orch = Arc::new(orch);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.dispatch_next_goal(DispatchOptions::at(now)).await })
        })
        .collect();
    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let completed = outcomes
        .iter()
        .filter(|o| o.reason == DispatchReason::Completed)
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes.iter().all(|o| matches!(
        o.reason,
        DispatchReason::Completed | DispatchReason::QueueEmpty | DispatchReason::LeaseActive
    )));
    assert_eq!(planner.call_count(), 1);
}
