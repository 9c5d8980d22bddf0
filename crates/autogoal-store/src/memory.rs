//! In-memory goal store
//!
//! A single explicit store object replacing process-wide lists. Constructed
//! per engine (or per test) and cleared with [`GoalStore::reset`].
//!
//! Locking layout:
//! - `queue`: items plus the [`DueIndex`], one mutex so both stay in sync
//! - `coordination`: leases, checkpoints and the active pointer, one mutex
//!   so acquire/release are atomic
//! - `idempotency`: DashMap entry API gives insert-if-absent per key

use crate::due_index::DueIndex;
use crate::error::StoreError;
use crate::store::{GoalStore, LeaseAcquisition};
use async_trait::async_trait;
use autogoal_types::{
    AutonomousGoalCandidate, AutonomousGoalQueueItem, GoalDlqItem, GoalExecutionCheckpoint, GoalId,
    GoalIdempotencyRecord, GoalLeaseRecord, GoalSuppressionRecord, IdempotencyKey, OwnerId,
    QueueStatus,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Default number of candidates, suppression records and settled queue
/// items retained
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Default)]
struct QueueState {
    items: HashMap<GoalId, AutonomousGoalQueueItem>,
    index: DueIndex,
    /// `queued` goals by `expires_at`
    expiry: BTreeSet<(DateTime<Utc>, GoalId)>,
    in_flight: HashSet<GoalId>,
    /// Settled goals in the order they settled, oldest evicted first
    settled: BTreeMap<u64, GoalId>,
    settled_seq: HashMap<GoalId, u64>,
    next_seq: u64,
}

impl QueueState {
    /// Store `item`, keep every secondary index in sync and evict the
    /// oldest settled items beyond `retain`
    fn upsert(&mut self, item: AutonomousGoalQueueItem, retain: usize) {
        let goal_id = item.goal_id;
        self.unlink(goal_id);
        match item.status {
            QueueStatus::Queued => {
                self.index.insert(item.order_key(), item.next_attempt_at);
                self.expiry.insert((item.expires_at, goal_id));
            }
            QueueStatus::Scheduled | QueueStatus::Running => {
                self.in_flight.insert(goal_id);
            }
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Expired => {
                self.next_seq += 1;
                self.settled.insert(self.next_seq, goal_id);
                self.settled_seq.insert(goal_id, self.next_seq);
            }
            // kept until replayed; the DLQ entry owns its lifetime
            QueueStatus::Dlq => {}
        }
        self.items.insert(goal_id, item);

        while self.settled.len() > retain {
            let Some((_, evicted)) = self.settled.pop_first() else {
                break;
            };
            self.settled_seq.remove(&evicted);
            self.items.remove(&evicted);
            tracing::trace!(goal_id = %evicted, "settled goal evicted");
        }
    }

    fn unlink(&mut self, goal_id: GoalId) {
        self.index.remove(goal_id);
        self.in_flight.remove(&goal_id);
        if let Some(old) = self.items.get(&goal_id) {
            self.expiry.remove(&(old.expires_at, goal_id));
        }
        if let Some(seq) = self.settled_seq.remove(&goal_id) {
            self.settled.remove(&seq);
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
struct Coordination {
    leases: HashMap<GoalId, GoalLeaseRecord>,
    /// Survives lease deletion so versions stay monotonic per goal
    lease_versions: HashMap<GoalId, u64>,
    checkpoints: HashMap<GoalId, GoalExecutionCheckpoint>,
    active_goal: Option<GoalId>,
}

/// Process-local [`GoalStore`]
#[derive(Debug)]
pub struct MemoryGoalStore {
    history_limit: usize,
    candidates: RwLock<Vec<AutonomousGoalCandidate>>,
    suppressions: RwLock<Vec<GoalSuppressionRecord>>,
    queue: Mutex<QueueState>,
    coordination: Mutex<Coordination>,
    idempotency: DashMap<IdempotencyKey, GoalIdempotencyRecord>,
    dlq: Mutex<Vec<GoalDlqItem>>,
}

impl MemoryGoalStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Bound the retained candidate and suppression history, and the number
    /// of `completed` / `failed` / `expired` items kept in the queue
    #[must_use]
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            candidates: RwLock::new(Vec::new()),
            suppressions: RwLock::new(Vec::new()),
            queue: Mutex::new(QueueState::default()),
            coordination: Mutex::new(Coordination::default()),
            idempotency: DashMap::new(),
            dlq: Mutex::new(Vec::new()),
        }
    }

    fn append_bounded<T: Clone>(&self, list: &RwLock<Vec<T>>, records: &[T]) {
        let mut guard = list.write();
        guard.extend_from_slice(records);
        let overflow = guard.len().saturating_sub(self.history_limit);
        if overflow > 0 {
            guard.drain(..overflow);
        }
    }

    fn newest_first<T: Clone>(list: &RwLock<Vec<T>>, limit: usize) -> Vec<T> {
        list.read().iter().rev().take(limit).cloned().collect()
    }
}

impl Default for MemoryGoalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GoalStore for MemoryGoalStore {
    async fn append_candidates(&self, candidates: &[AutonomousGoalCandidate]) -> Result<(), StoreError> {
        self.append_bounded(&self.candidates, candidates);
        Ok(())
    }

    async fn list_candidates(&self, limit: usize) -> Result<Vec<AutonomousGoalCandidate>, StoreError> {
        Ok(Self::newest_first(&self.candidates, limit))
    }

    async fn append_suppressions(&self, records: &[GoalSuppressionRecord]) -> Result<(), StoreError> {
        self.append_bounded(&self.suppressions, records);
        Ok(())
    }

    async fn list_suppressions(&self, limit: usize) -> Result<Vec<GoalSuppressionRecord>, StoreError> {
        Ok(Self::newest_first(&self.suppressions, limit))
    }

    async fn insert_queue_items(&self, items: Vec<AutonomousGoalQueueItem>) -> Result<(), StoreError> {
        let mut queue = self.queue.lock();
        if let Some(dup) = items.iter().find(|i| queue.items.contains_key(&i.goal_id)) {
            return Err(StoreError::DuplicateGoal(dup.goal_id));
        }
        for item in items {
            queue.upsert(item, self.history_limit);
        }
        Ok(())
    }

    async fn list_queue(&self) -> Result<Vec<AutonomousGoalQueueItem>, StoreError> {
        let queue = self.queue.lock();
        let mut items: Vec<_> = queue.items.values().cloned().collect();
        items.sort_by_key(AutonomousGoalQueueItem::order_key);
        Ok(items)
    }

    async fn get_queue_item(&self, goal_id: GoalId) -> Result<Option<AutonomousGoalQueueItem>, StoreError> {
        Ok(self.queue.lock().items.get(&goal_id).cloned())
    }

    async fn update_queue_item(&self, item: &AutonomousGoalQueueItem) -> Result<(), StoreError> {
        let mut queue = self.queue.lock();
        if !queue.items.contains_key(&item.goal_id) {
            return Err(StoreError::GoalNotFound(item.goal_id));
        }
        queue.upsert(item.clone(), self.history_limit);
        Ok(())
    }

    async fn compare_and_update_queue_item(
        &self,
        item: &AutonomousGoalQueueItem,
        expected: QueueStatus,
    ) -> Result<bool, StoreError> {
        let mut queue = self.queue.lock();
        let current = queue
            .items
            .get(&item.goal_id)
            .map(|current| current.status)
            .ok_or(StoreError::GoalNotFound(item.goal_id))?;
        if current != expected {
            return Ok(false);
        }
        queue.upsert(item.clone(), self.history_limit);
        Ok(true)
    }

    async fn next_due_goal(&self, now: DateTime<Utc>) -> Result<Option<AutonomousGoalQueueItem>, StoreError> {
        let mut queue = self.queue.lock();
        while let Some(goal_id) = queue.index.next_due(now) {
            let Some(item) = queue
                .items
                .get(&goal_id)
                .filter(|item| item.status == QueueStatus::Queued)
                .cloned()
            else {
                tracing::debug!(%goal_id, "dropping stale due-index entry");
                queue.index.remove(goal_id);
                continue;
            };
            if item.is_due(now) {
                return Ok(Some(item));
            }
            // promoted by a later clock reading than this one
            queue.index.insert(item.order_key(), item.next_attempt_at);
        }
        Ok(None)
    }

    async fn list_expired_queued(&self, now: DateTime<Utc>) -> Result<Vec<AutonomousGoalQueueItem>, StoreError> {
        let queue = self.queue.lock();
        Ok(queue
            .expiry
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .filter_map(|(_, goal_id)| queue.items.get(goal_id).cloned())
            .collect())
    }

    async fn list_in_flight(&self) -> Result<Vec<AutonomousGoalQueueItem>, StoreError> {
        let queue = self.queue.lock();
        let mut items: Vec<_> = queue
            .in_flight
            .iter()
            .filter_map(|goal_id| queue.items.get(goal_id).cloned())
            .collect();
        items.sort_by_key(AutonomousGoalQueueItem::order_key);
        Ok(items)
    }

    async fn get_lease(&self, goal_id: GoalId) -> Result<Option<GoalLeaseRecord>, StoreError> {
        Ok(self.coordination.lock().leases.get(&goal_id).cloned())
    }

    async fn try_acquire_lease(
        &self,
        goal_id: GoalId,
        owner: &OwnerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, StoreError> {
        let mut coord = self.coordination.lock();
        if let Some(existing) = coord.leases.get(&goal_id) {
            if existing.is_live(now) {
                return Ok(LeaseAcquisition::Held(existing.clone()));
            }
        }

        let version = {
            let v = coord.lease_versions.entry(goal_id).or_insert(0);
            *v += 1;
            *v
        };
        let lease = GoalLeaseRecord {
            goal_id,
            owner_id: owner.clone(),
            leased_at: now,
            lease_expires_at: now + ttl,
            heartbeat_at: now,
            version,
        };
        coord.leases.insert(goal_id, lease.clone());
        Ok(LeaseAcquisition::Acquired(lease))
    }

    async fn heartbeat_lease(
        &self,
        goal_id: GoalId,
        owner: &OwnerId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<GoalLeaseRecord, StoreError> {
        let mut coord = self.coordination.lock();
        match coord.leases.get_mut(&goal_id) {
            Some(lease) if lease.owner_id == *owner && lease.is_live(now) => {
                lease.heartbeat_at = now;
                lease.lease_expires_at = now + ttl;
                Ok(lease.clone())
            }
            _ => Err(StoreError::LeaseNotOwned {
                goal_id,
                owner: owner.to_string(),
            }),
        }
    }

    async fn register_idempotency(
        &self,
        record: GoalIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.idempotency.entry(record.key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    existing.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn get_idempotency(&self, key: &IdempotencyKey) -> Result<Option<GoalIdempotencyRecord>, StoreError> {
        Ok(self.idempotency.get(key).map(|r| r.value().clone()))
    }

    async fn remove_idempotency(&self, key: &IdempotencyKey) -> Result<(), StoreError> {
        self.idempotency.remove(key);
        Ok(())
    }

    async fn put_checkpoint(&self, checkpoint: GoalExecutionCheckpoint) -> Result<(), StoreError> {
        self.coordination
            .lock()
            .checkpoints
            .insert(checkpoint.goal_id, checkpoint);
        Ok(())
    }

    async fn get_checkpoint(&self, goal_id: GoalId) -> Result<Option<GoalExecutionCheckpoint>, StoreError> {
        Ok(self.coordination.lock().checkpoints.get(&goal_id).cloned())
    }

    async fn set_active_goal(&self, goal_id: GoalId) -> Result<(), StoreError> {
        self.coordination.lock().active_goal = Some(goal_id);
        Ok(())
    }

    async fn active_goal(&self) -> Result<Option<GoalId>, StoreError> {
        Ok(self.coordination.lock().active_goal)
    }

    async fn release_goal(&self, goal_id: GoalId, owner: Option<&OwnerId>) -> Result<bool, StoreError> {
        let mut coord = self.coordination.lock();
        if let (Some(owner), Some(lease)) = (owner, coord.leases.get(&goal_id)) {
            if lease.owner_id != *owner {
                tracing::debug!(%goal_id, holder = %lease.owner_id, "release skipped, lease changed hands");
                return Ok(false);
            }
        }
        coord.leases.remove(&goal_id);
        coord.checkpoints.remove(&goal_id);
        if coord.active_goal == Some(goal_id) {
            coord.active_goal = None;
        }
        Ok(true)
    }

    async fn push_dlq(&self, item: GoalDlqItem) -> Result<(), StoreError> {
        self.dlq.lock().push(item);
        Ok(())
    }

    async fn list_dlq(&self) -> Result<Vec<GoalDlqItem>, StoreError> {
        Ok(self.dlq.lock().clone())
    }

    async fn take_dlq(&self, goal_id: GoalId) -> Result<Option<GoalDlqItem>, StoreError> {
        let mut dlq = self.dlq.lock();
        Ok(dlq
            .iter()
            .position(|entry| entry.goal_id == goal_id)
            .map(|idx| dlq.remove(idx)))
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.candidates.write().clear();
        self.suppressions.write().clear();
        self.queue.lock().clear();
        *self.coordination.lock() = Coordination::default();
        self.idempotency.clear();
        self.dlq.lock().clear();
        Ok(())
    }
}
