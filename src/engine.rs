//! Risk scoring engine
//!
//! Deterministic inference over per-entity velocity and amount structuring,
//! with hot-swappable rule weights. The active weight set lives in a
//! two-slot double buffer selected by an atomic index: the watcher thread
//! writes the inactive slot in full and then flips the index with release
//! ordering, so a scorer reading under acquire sees either the complete old
//! set or the complete new set, never a mix.
//!
//! Nothing on this path allocates or blocks beyond the short shard lock
//! inside the store.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::store::{monotonic_nanos, ShardedRiskStore};

/// Regulatory reporting proxy: amounts at or above 10 000 major units are
/// reportable anyway and no longer look like structuring.
pub const STRUCTURING_CEILING_MICROS: i64 = 10_000 * 1_000_000;

const BLOCK_THRESHOLD: f32 = 0.8;
const ALERT_THRESHOLD: f32 = 0.5;

/// One immutable set of rule weights. Thresholds are expressed in major
/// units and converted to micros at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub velocity_weight: f32,
    pub structuring_weight: f32,
    pub velocity_threshold: f32,
    pub structuring_threshold: f32,
    pub baseline: f32,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            velocity_weight: 0.6,
            structuring_weight: 0.25,
            velocity_threshold: 5.0,
            structuring_threshold: 9000.0,
            baseline: 0.05,
        }
    }
}

impl ModelWeights {
    pub fn structuring_threshold_micros(&self) -> i64 {
        (f64::from(self.structuring_threshold) * 1_000_000.0).round() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScore {
    pub total: f32,
    pub blocked: bool,
}

impl RiskScore {
    /// Whether this score is worth materializing downstream.
    pub fn alertable(&self) -> bool {
        self.total > ALERT_THRESHOLD
    }
}

/// Double-buffered weight slots with an atomic active index.
struct RuleSlots {
    slots: [UnsafeCell<ModelWeights>; 2],
    active: AtomicUsize,
}

// SAFETY: exactly one writer (the rules watcher) ever calls `publish`, and
// it only writes the slot that `active` does not point at; readers copy the
// slot `active` points at after an acquire load. Consecutive publishes are
// separated by the watcher poll interval (>= 1s), orders of magnitude longer
// than any reader's copy of the 20-byte struct.
unsafe impl Sync for RuleSlots {}

impl RuleSlots {
    fn new(weights: ModelWeights) -> Self {
        Self {
            slots: [UnsafeCell::new(weights), UnsafeCell::new(weights)],
            active: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn load(&self) -> ModelWeights {
        let idx = self.active.load(Ordering::Acquire);
        unsafe { *self.slots[idx].get() }
    }

    fn publish(&self, weights: ModelWeights) {
        let next = 1 - self.active.load(Ordering::Relaxed);
        unsafe { *self.slots[next].get() = weights };
        self.active.store(next, Ordering::Release);
    }
}

pub struct RiskEngine {
    store: ShardedRiskStore,
    rules: RuleSlots,
}

impl RiskEngine {
    pub fn new(shard_soft_cap: Option<usize>) -> Self {
        Self::with_weights(ModelWeights::default(), shard_soft_cap)
    }

    pub fn with_weights(weights: ModelWeights, shard_soft_cap: Option<usize>) -> Self {
        Self {
            store: ShardedRiskStore::new(shard_soft_cap),
            rules: RuleSlots::new(weights),
        }
    }

    /// Make `weights` the active set for all future evaluations.
    /// Single-writer: only the rules watcher may call this.
    pub fn publish_weights(&self, weights: ModelWeights) {
        self.rules.publish(weights);
    }

    /// Copy of the currently active weight set.
    pub fn active_weights(&self) -> ModelWeights {
        self.rules.load()
    }

    pub fn store(&self) -> &ShardedRiskStore {
        &self.store
    }

    /// Score one payment observed now.
    pub fn evaluate(&self, debtor: &str, amount_micros: i64) -> RiskScore {
        self.evaluate_at(debtor, amount_micros, monotonic_nanos())
    }

    /// Score one payment observed at `now_ns` on the monotonic clock.
    pub fn evaluate_at(&self, debtor: &str, amount_micros: i64, now_ns: u64) -> RiskScore {
        let w = self.rules.load();
        let velocity = self.store.touch(debtor, now_ns);

        // Saturates at twice the threshold
        let velocity_score = (velocity / (w.velocity_threshold * 2.0)).min(1.0);

        let structuring_score = if amount_micros >= w.structuring_threshold_micros()
            && amount_micros < STRUCTURING_CEILING_MICROS
        {
            1.0
        } else {
            0.0
        };

        let mut total = w.baseline
            + velocity_score * w.velocity_weight
            + structuring_score * w.structuring_weight;
        if total > 1.0 {
            total = 1.0;
        }

        RiskScore {
            total,
            blocked: total > BLOCK_THRESHOLD,
        }
    }
}
