//! Identifiers
//!
//! Goal and candidate ids are ULIDs so that their string form sorts by
//! creation time; this gives the queue a stable lexicographic tiebreak.
//! Worker owner ids are random UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new id
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map(Self)
            }
        }
    };
}

ulid_id!(
    /// Identifier of a queued goal (distinct from the candidate it came from)
    GoalId
);
ulid_id!(
    /// Identifier of a generated candidate
    CandidateId
);
ulid_id!(
    /// Identifier of an append-only audit record (suppression, DLQ entry, episode)
    RecordId
);

/// Identity of a dispatch worker holding a lease
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Generate a unique owner id for one dispatch attempt
    #[inline]
    #[must_use]
    pub fn generate(worker: &str) -> Self {
        Self(format!("{worker}:{}", Uuid::new_v4()))
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_id_round_trips_through_string() {
        let id = GoalId::new();
        let parsed: GoalId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn owner_ids_are_unique_per_attempt() {
        let a = OwnerId::generate("worker-1");
        let b = OwnerId::generate("worker-1");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("worker-1:"));
    }
}
