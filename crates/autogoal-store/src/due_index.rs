//! Time-ordered due index
//!
//! Tracks `queued` items in two ordered sets:
//! - `ready`: dispatchable now, ordered by [`QueueOrderKey`]
//! - `deferred`: waiting for `next_attempt_at`, ordered by that instant
//!
//! `next_due` promotes every deferred entry whose instant has passed and
//! returns the head of `ready`. No full queue rescan per dispatch tick.

use autogoal_types::{GoalId, QueueOrderKey};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy)]
enum Slot {
    Ready(QueueOrderKey),
    Deferred(DateTime<Utc>),
}

/// Index over queued goals
#[derive(Debug, Default)]
pub struct DueIndex {
    ready: BTreeSet<QueueOrderKey>,
    deferred: BTreeMap<(DateTime<Utc>, GoalId), QueueOrderKey>,
    slots: HashMap<GoalId, Slot>,
}

impl DueIndex {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-position a queued goal
    pub fn insert(&mut self, key: QueueOrderKey, next_attempt_at: Option<DateTime<Utc>>) {
        self.remove(key.goal_id);
        match next_attempt_at {
            Some(at) => {
                self.deferred.insert((at, key.goal_id), key);
                self.slots.insert(key.goal_id, Slot::Deferred(at));
            }
            None => {
                self.ready.insert(key);
                self.slots.insert(key.goal_id, Slot::Ready(key));
            }
        }
    }

    /// Drop a goal from the index; returns whether it was present
    pub fn remove(&mut self, goal_id: GoalId) -> bool {
        match self.slots.remove(&goal_id) {
            Some(Slot::Ready(key)) => {
                self.ready.remove(&key);
                true
            }
            Some(Slot::Deferred(at)) => {
                self.deferred.remove(&(at, goal_id));
                true
            }
            None => false,
        }
    }

    /// Highest-priority goal dispatchable at `now`
    pub fn next_due(&mut self, now: DateTime<Utc>) -> Option<GoalId> {
        while let Some((&(at, goal_id), _)) = self.deferred.first_key_value() {
            if at > now {
                break;
            }
            if let Some((_, key)) = self.deferred.pop_first() {
                self.ready.insert(key);
                self.slots.insert(goal_id, Slot::Ready(key));
            }
        }
        self.ready.first().map(|key| key.goal_id)
    }

    /// Earliest pending retry instant, if any
    #[inline]
    #[must_use]
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.deferred.first_key_value().map(|(&(at, _), _)| at)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.deferred.clear();
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(total: f64, risk_rank: u8, enqueued_at: DateTime<Utc>) -> QueueOrderKey {
        QueueOrderKey {
            total,
            risk_rank,
            enqueued_at,
            goal_id: GoalId::new(),
        }
    }

    #[test]
    fn ready_items_come_out_in_priority_order() {
        let now = Utc::now();
        let mut index = DueIndex::new();
        let low = key(40.0, 2, now);
        let high = key(80.0, 2, now);
        index.insert(low, None);
        index.insert(high, None);

        assert_eq!(index.next_due(now), Some(high.goal_id));
        index.remove(high.goal_id);
        assert_eq!(index.next_due(now), Some(low.goal_id));
    }

    #[test]
    fn deferred_items_wait_for_their_instant() {
        let now = Utc::now();
        let mut index = DueIndex::new();
        let later = key(90.0, 4, now);
        index.insert(later, Some(now + Duration::seconds(10)));

        assert_eq!(index.next_due(now), None);
        assert_eq!(index.next_wakeup(), Some(now + Duration::seconds(10)));
        assert_eq!(index.next_due(now + Duration::seconds(10)), Some(later.goal_id));
        assert_eq!(index.next_wakeup(), None);
    }

    #[test]
    fn promoted_item_competes_on_priority() {
        let now = Utc::now();
        let mut index = DueIndex::new();
        let ready = key(50.0, 2, now);
        let retry = key(70.0, 3, now);
        index.insert(ready, None);
        index.insert(retry, Some(now - Duration::seconds(1)));

        assert_eq!(index.next_due(now), Some(retry.goal_id));
    }

    #[test]
    fn reinsert_moves_between_sets() {
        let now = Utc::now();
        let mut index = DueIndex::new();
        let k = key(50.0, 2, now);
        index.insert(k, None);
        index.insert(k, Some(now + Duration::seconds(30)));

        assert_eq!(index.len(), 1);
        assert_eq!(index.next_due(now), None);
        assert!(index.remove(k.goal_id));
        assert!(index.is_empty());
    }
}
