//! Deterministic hashing primitives
//!
//! - [`GoalSignature`]: SHA-256 over (chain, source, intent, normalized goal),
//!   truncated to [`SIGNATURE_HEX_LEN`] hex chars. Sole dedup key.
//! - [`IdempotencyKey`]: Blake3 over (goal id, signature, dry-run, allow-writes).

use crate::candidate::{GoalIntent, GoalSource};
use crate::ids::GoalId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex length of a goal signature
pub const SIGNATURE_HEX_LEN: usize = 24;

/// Lower-case the goal text and collapse all whitespace runs into one space
#[must_use]
pub fn normalize_goal_text(goal: &str) -> String {
    goal.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic dedup key of a goal
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalSignature(String);

impl GoalSignature {
    /// Compute the signature of a goal
    #[must_use]
    pub fn compute(chain_type: &str, source: GoalSource, intent: GoalIntent, goal: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(chain_type.trim().to_lowercase().as_bytes());
        hasher.update([0x1f]);
        hasher.update(source.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(intent.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(normalize_goal_text(goal).as_bytes());
        let digest = hasher.finalize();
        let mut hex = hex::encode(digest);
        hex.truncate(SIGNATURE_HEX_LEN);
        Self(hex)
    }

    /// Wrap an already computed signature (e.g. read back from storage)
    #[inline]
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GoalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-once key guarding one equivalent dispatch request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key for a dispatch of `goal_id` with the given flags
    #[must_use]
    pub fn derive(goal_id: GoalId, signature: &GoalSignature, dry_run: bool, allow_writes: bool) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(goal_id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(signature.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(&[u8::from(dry_run), u8::from(allow_writes)]);
        Self(hasher.finalize().to_hex().to_string())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_goal_text("  Scale\tUP   the\nSequencer "), "scale up the sequencer");
    }

    #[test]
    fn signature_has_fixed_length() {
        let sig = GoalSignature::compute("optimism", GoalSource::Cost, GoalIntent::CostOptimize, "x");
        assert_eq!(sig.as_str().len(), SIGNATURE_HEX_LEN);
    }

    #[test]
    fn signature_depends_on_every_component() {
        let base = GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "goal");
        assert_ne!(base, GoalSignature::compute("arbitrum", GoalSource::Metrics, GoalIntent::Stabilize, "goal"));
        assert_ne!(base, GoalSignature::compute("optimism", GoalSource::Anomaly, GoalIntent::Stabilize, "goal"));
        assert_ne!(base, GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Investigate, "goal"));
        assert_ne!(base, GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, "other"));
    }

    #[test]
    fn idempotency_key_depends_on_flags() {
        let goal = GoalId::new();
        let sig = GoalSignature::from_raw("abc");
        let a = IdempotencyKey::derive(goal, &sig, false, false);
        assert_eq!(a, IdempotencyKey::derive(goal, &sig, false, false));
        assert_ne!(a, IdempotencyKey::derive(goal, &sig, true, false));
        assert_ne!(a, IdempotencyKey::derive(goal, &sig, false, true));
    }

    proptest! {
        #[test]
        fn prop_signature_ignores_case_and_spacing(words in prop::collection::vec("[a-zA-Z]{1,8}", 1..6)) {
            let spaced = words.join("   ");
            let upper = words.join(" ").to_uppercase();
            let a = GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, &spaced);
            let b = GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, &upper);
            prop_assert_eq!(a, b);
        }
    }
}
