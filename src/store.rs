//! Sharded per-entity risk state
//!
//! 1024 independently lockable shards keyed by entity name. A single scorer
//! runs today, but the layout already supports N scorers: threads touching
//! different shards never contend, and each shard (mutex included) sits on
//! its own cache line.

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crossbeam_utils::CachePadded;
use rustc_hash::FxHashMap;

/// Shard count. Power of two so selection is a mask, not a modulo.
pub const RISK_STORE_SHARDS: usize = 1024;

/// Soft limit on entries per shard (500 * 1024 = 512k entities total).
pub const SHARD_SOFT_CAP: usize = 500;

const WINDOW_DECAY_NS: u64 = 1_000_000_000;

/// Nanoseconds on a process-local monotonic clock.
pub fn monotonic_nanos() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Rolling state for one entity. Cache-line sized so adjacent entries never
/// false-share.
#[repr(align(64))]
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityState {
    pub last_seen_ns: u64,
    pub velocity: f32,
    pub structuring: f32,
}

/// Stand-in for the external tiered cache (Redis/Ignite) that would hold
/// cooled-off entities. Always cold in v1.
fn cold_state(_key: &str) -> EntityState {
    EntityState::default()
}

struct Shard {
    entries: Mutex<FxHashMap<String, EntityState>>,
}

/// FNV-1a over bytes. 64-bit offset basis / prime per the reference
/// parameters; stable across platforms, which keeps shard placement
/// reproducible.
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(PRIME);
        i += 1;
    }
    hash
}

pub struct ShardedRiskStore {
    shards: Box<[CachePadded<Shard>]>,
    soft_cap: Option<usize>,
}

impl ShardedRiskStore {
    /// `soft_cap` bounds entries per shard; `None` grows without limit.
    /// Overflowing a set cap still admits the entity (there is no eviction
    /// tier yet) but logs the shard so capacity planning can see it.
    pub fn new(soft_cap: Option<usize>) -> Self {
        let shards = (0..RISK_STORE_SHARDS)
            .map(|_| {
                CachePadded::new(Shard {
                    entries: Mutex::new(FxHashMap::default()),
                })
            })
            .collect();
        Self { shards, soft_cap }
    }

    /// Record one observation of `name` at `now_ns` and return the updated
    /// velocity. Steady-state lookups allocate nothing; only the first
    /// observation of an entity copies the key.
    pub fn touch(&self, name: &str, now_ns: u64) -> f32 {
        let shard_idx = (fnv1a_64(name.as_bytes()) & (RISK_STORE_SHARDS as u64 - 1)) as usize;
        let shard = &self.shards[shard_idx];

        let mut entries = shard
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(state) = entries.get_mut(name) {
            return bump(state, now_ns);
        }

        if let Some(cap) = self.soft_cap {
            if entries.len() >= cap {
                tracing::warn!(
                    target: "AEGIS::STORE",
                    shard = shard_idx,
                    entries = entries.len(),
                    "shard over soft cap, admitting entity anyway"
                );
            }
        }
        let state = entries
            .entry(name.to_owned())
            .or_insert_with(|| cold_state(name));
        bump(state, now_ns)
    }

    /// Total entities across all shards. Walks every shard lock; not for
    /// the hot path.
    pub fn entity_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .entries
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .len()
            })
            .sum()
    }
}

fn bump(state: &mut EntityState, now_ns: u64) -> f32 {
    if now_ns.saturating_sub(state.last_seen_ns) > WINDOW_DECAY_NS {
        state.velocity = 0.0;
    }
    state.last_seen_ns = now_ns;
    state.velocity += 1.0;
    state.velocity
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_fnv1a_reference_values() {
        // Reference vectors for the 64-bit FNV-1a parameters
        assert_eq!(fnv1a_64(b""), 0xCBF2_9CE4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xAF63_DC4C_8601_EC8C);
        assert_eq!(fnv1a_64(b"foobar"), 0x85944171F73967E8);
    }

    #[test]
    fn test_first_observation_velocity_is_one() {
        let store = ShardedRiskStore::new(None);
        assert_eq!(store.touch("Alice Smith", 1_000), 1.0);
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn test_velocity_accumulates_within_window() {
        let store = ShardedRiskStore::new(None);
        let base = 5_000_000_000u64;
        for i in 0..10 {
            let v = store.touch("Acme Corp", base + i * 1_000_000);
            assert_eq!(v, (i + 1) as f32);
        }
    }

    #[test]
    fn test_velocity_decays_after_one_second_idle() {
        let store = ShardedRiskStore::new(None);
        let base = 1_000_000_000u64;
        store.touch("Acme Corp", base);
        store.touch("Acme Corp", base + 1_000_000);
        // exactly 1s is inside the window, just over 1s is not
        assert_eq!(store.touch("Acme Corp", base + 1_000_000_000), 3.0);
        assert_eq!(
            store.touch("Acme Corp", base + 2_100_000_000),
            1.0,
            "idle gap over 1s must reset the accumulator"
        );
    }

    #[test]
    fn test_entities_are_independent() {
        let store = ShardedRiskStore::new(None);
        store.touch("Alice", 1_000);
        store.touch("Alice", 2_000);
        assert_eq!(store.touch("Bob", 3_000), 1.0);
    }

    #[test]
    fn test_soft_cap_overflow_still_admits() {
        let store = ShardedRiskStore::new(Some(0));
        assert_eq!(store.touch("Alice", 1_000), 1.0);
        assert_eq!(store.touch("Bob", 1_000), 1.0);
        assert_eq!(store.entity_count(), 2);
    }

    #[test]
    fn test_shard_distribution_uniformity() {
        // 10^6 random 8-byte keys over 1024 shards: the coefficient of
        // variation of shard occupancy must stay under 5%.
        const KEYS: usize = 1_000_000;
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut counts = [0u64; RISK_STORE_SHARDS];
        for _ in 0..KEYS {
            let key: u64 = rng.gen();
            let shard = (fnv1a_64(&key.to_le_bytes()) & (RISK_STORE_SHARDS as u64 - 1)) as usize;
            counts[shard] += 1;
        }

        let mean = KEYS as f64 / RISK_STORE_SHARDS as f64;
        let variance = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / RISK_STORE_SHARDS as f64;
        let cv = variance.sqrt() / mean;
        assert!(cv < 0.05, "shard occupancy CV {cv:.4} exceeds 5%");
    }
}
