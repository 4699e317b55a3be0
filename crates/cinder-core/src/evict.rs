//! Approximated-LRU eviction.
//!
//! Rather than keeping an exact access-ordered index, every value carries
//! a 24-bit stamp of a coarse clock (1 s resolution). Under memory
//! pressure we sample a handful of keys, feed them into a small pool
//! ordered by estimated idle time, and evict from the idle end of the
//! pool until usage drops back under the budget. Constant memory, bounded
//! cost per eviction, and close enough to true LRU in practice.

use bytes::Bytes;

use crate::db::Db;
use crate::memory::MemoryAccountant;
use crate::time;

/// Width of the LRU clock stamp carried by every object.
pub const LRU_BITS: u32 = 24;

/// Largest representable clock value before wraparound.
pub const LRU_CLOCK_MAX: u64 = (1 << LRU_BITS) - 1;

/// Clock granularity in milliseconds.
pub const LRU_CLOCK_RESOLUTION_MS: u64 = 1000;

/// Capacity of the eviction candidate pool.
pub const EVPOOL_SIZE: usize = 16;

/// Keys sampled per populate round.
pub const MEMORY_SAMPLES: usize = 5;

/// What to do when memory usage exceeds the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Reject memory-hungry writes instead of evicting.
    #[default]
    NoEviction,
    /// Evict the approximately least-recently-used key from the whole
    /// keyspace.
    AllKeysLru,
    /// Evict only among keys that carry an expiry deadline.
    VolatileLru,
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    /// Usage is back under the budget.
    Ok,
    /// Nothing evictable remained while still over budget.
    Fail,
}

/// Reads the LRU clock directly from the wall clock.
#[inline]
pub fn lru_clock_now() -> u32 {
    ((time::mstime() / LRU_CLOCK_RESOLUTION_MS) & LRU_CLOCK_MAX) as u32
}

/// Estimated time in ms since `stamp` was taken, given the current
/// clock value. Handles 24-bit wraparound.
pub fn idle_time_ms(clock: u32, stamp: u32) -> u64 {
    let (clock, stamp) = (clock as u64, stamp as u64);
    if clock >= stamp {
        (clock - stamp) * LRU_CLOCK_RESOLUTION_MS
    } else {
        (clock + (LRU_CLOCK_MAX - stamp)) * LRU_CLOCK_RESOLUTION_MS
    }
}

/// The server-wide LRU clock.
///
/// When the server tick runs at least once per clock resolution, reads
/// return a cached value refreshed by the tick; otherwise every read
/// samples the wall clock.
#[derive(Debug)]
pub struct LruClock {
    hz: u32,
    cached: u32,
}

impl LruClock {
    pub fn new(hz: u32) -> Self {
        Self {
            hz: hz.max(1),
            cached: lru_clock_now(),
        }
    }

    /// Refreshes the cached value; called from the periodic tick.
    pub fn refresh(&mut self) {
        self.cached = lru_clock_now();
    }

    /// Current clock value.
    pub fn value(&self) -> u32 {
        if 1000 / self.hz as u64 <= LRU_CLOCK_RESOLUTION_MS {
            self.cached
        } else {
            lru_clock_now()
        }
    }
}

#[derive(Debug, Clone)]
struct PoolEntry {
    key: Bytes,
    idle: u64,
}

/// Bounded pool of eviction candidates, ordered by ascending idle time.
///
/// Entries are inserted in sorted position; a candidate less idle than
/// everything in a full pool is dropped. Keys are not validated at
/// insertion time — they may be gone by the time the evictor walks the
/// pool, and the walk just skips such ghosts.
pub struct EvictionPool {
    slots: Vec<Option<PoolEntry>>,
}

impl EvictionPool {
    pub fn new() -> Self {
        Self {
            slots: (0..EVPOOL_SIZE).map(|_| None).collect(),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Draws [`MEMORY_SAMPLES`] keys from the policy's sample dict and
    /// offers each to the pool.
    pub fn populate(&mut self, db: &Db, clock: u32) {
        let keys = match db.policy() {
            EvictionPolicy::NoEviction => return,
            EvictionPolicy::AllKeysLru => db.data_dict().sample_keys(MEMORY_SAMPLES),
            EvictionPolicy::VolatileLru => db.expire_dict().sample_keys(MEMORY_SAMPLES),
        };

        for key in keys {
            let Some(obj) = db.data_dict().get(&key) else {
                continue;
            };
            let idle = idle_time_ms(clock, obj.lru());
            self.insert(key, idle);
        }
    }

    /// Offers a candidate to the pool, keeping occupied slots sorted by
    /// ascending idle time.
    fn insert(&mut self, key: Bytes, idle: u64) {
        // first slot that is free or holds an entry at least as idle
        let mut k = 0;
        while k < EVPOOL_SIZE && matches!(&self.slots[k], Some(e) if e.idle < idle) {
            k += 1;
        }

        if k == 0 && self.slots[EVPOOL_SIZE - 1].is_some() {
            // less idle than everything in a full pool
            return;
        }

        if k < EVPOOL_SIZE && self.slots[k].is_none() {
            // free slot, take it as-is
        } else if self.slots[EVPOOL_SIZE - 1].is_none() {
            // room at the tail: shift [k..end-1] right
            for i in (k..EVPOOL_SIZE - 1).rev() {
                self.slots[i + 1] = self.slots[i].take();
            }
        } else {
            // full on the right: discard the least idle entry instead
            k -= 1;
            for i in 0..k {
                self.slots[i] = self.slots[i + 1].take();
            }
        }

        self.slots[k] = Some(PoolEntry { key, idle });
    }

    /// Removes slot `k`, shifting the tail left so occupied slots stay
    /// contiguous and sorted.
    fn take_at(&mut self, k: usize) -> PoolEntry {
        let entry = self.slots[k].take().expect("occupied slot");
        for i in k..EVPOOL_SIZE - 1 {
            self.slots[i] = self.slots[i + 1].take();
        }
        entry
    }

    /// Index of the most idle occupied slot.
    fn best_index(&self) -> Option<usize> {
        (0..EVPOOL_SIZE).rev().find(|&k| self.slots[k].is_some())
    }

    #[cfg(test)]
    fn idles(&self) -> Vec<u64> {
        self.slots.iter().flatten().map(|e| e.idle).collect()
    }
}

impl Default for EvictionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Evicts keys from `db` until usage drops to `max_memory` bytes.
///
/// Each round repopulates the pool from the policy's sample source, then
/// walks the pool from most to least idle, skipping keys that no longer
/// exist in the required set. Freed bytes are measured as the
/// used-memory delta around the delete. Returns [`EvictOutcome::Fail`]
/// when a repopulated pool yields no evictable key while still over
/// budget.
pub fn perform_evictions(
    db: &mut Db,
    pool: &mut EvictionPool,
    accountant: &MemoryAccountant,
    max_memory: i64,
    clock: u32,
) -> EvictOutcome {
    if accountant.used_bytes() <= max_memory {
        return EvictOutcome::Ok;
    }
    if db.policy() == EvictionPolicy::NoEviction {
        return EvictOutcome::Fail;
    }

    loop {
        if accountant.used_bytes() <= max_memory {
            return EvictOutcome::Ok;
        }

        pool.populate(db, clock);

        let mut victim: Option<Bytes> = None;
        while let Some(k) = pool.best_index() {
            let entry = pool.take_at(k);
            let live = match db.policy() {
                EvictionPolicy::VolatileLru => db.expire_dict().contains_key(&entry.key),
                EvictionPolicy::AllKeysLru => db.data_dict().contains_key(&entry.key),
                EvictionPolicy::NoEviction => false,
            };
            if live {
                victim = Some(entry.key);
                break;
            }
            // ghost entry: the key was deleted after it was pooled
        }

        match victim {
            Some(key) => {
                let before = accountant.used_bytes();
                db.delete(&key);
                let freed = before - accountant.used_bytes();
                tracing::debug!(db = db.id(), freed, "evicted key under memory pressure");
            }
            None => return EvictOutcome::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SetFlags;
    use crate::object::Object;

    fn key(i: usize) -> Bytes {
        Bytes::from(format!("key:{i}"))
    }

    #[test]
    fn idle_time_simple() {
        assert_eq!(idle_time_ms(10, 4), 6 * LRU_CLOCK_RESOLUTION_MS);
        assert_eq!(idle_time_ms(10, 10), 0);
    }

    #[test]
    fn idle_time_wraps_around() {
        // stamp taken just before the 24-bit clock wrapped
        let stamp = (LRU_CLOCK_MAX - 2) as u32;
        let clock = 3u32;
        assert_eq!(
            idle_time_ms(clock, stamp),
            (3 + 2) * LRU_CLOCK_RESOLUTION_MS
        );
    }

    #[test]
    fn clock_is_cached_at_normal_tick_rates() {
        let clock = LruClock::new(10);
        // the cached value and a direct read are at most one tick apart
        let direct = lru_clock_now();
        assert!(idle_time_ms(direct, clock.value()) <= LRU_CLOCK_RESOLUTION_MS);
    }

    #[test]
    fn pool_stays_sorted() {
        let mut pool = EvictionPool::new();
        for idle in [50u64, 10, 90, 30, 70, 20, 60, 40, 80, 0] {
            pool.insert(Bytes::from(format!("k{idle}")), idle);
        }
        let idles = pool.idles();
        let mut sorted = idles.clone();
        sorted.sort_unstable();
        assert_eq!(idles, sorted);
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let mut pool = EvictionPool::new();
        for i in 0..100u64 {
            pool.insert(Bytes::from(format!("k{i}")), i);
        }
        assert_eq!(pool.len(), EVPOOL_SIZE);
        // the survivors are the most idle candidates
        assert_eq!(
            pool.idles(),
            (100 - EVPOOL_SIZE as u64..100).collect::<Vec<_>>()
        );
    }

    #[test]
    fn low_idle_candidate_is_dropped_when_full() {
        let mut pool = EvictionPool::new();
        for i in 0..EVPOOL_SIZE as u64 {
            pool.insert(Bytes::from(format!("k{i}")), 100 + i);
        }
        pool.insert(Bytes::from_static(b"cold"), 1);
        assert_eq!(pool.len(), EVPOOL_SIZE);
        assert!(!pool.idles().contains(&1));
    }

    fn filled_db(policy: EvictionPolicy, accountant: &MemoryAccountant, n: usize) -> Db {
        let mut db = Db::new(0, policy, accountant.clone());
        for i in 0..n {
            let k = key(i);
            db.set_key(
                &k,
                Object::string(Bytes::from(vec![b'x'; 64]), 0),
                SetFlags::NONE,
                0,
            );
            if policy == EvictionPolicy::VolatileLru {
                db.set_expire(&k, time::mstime() + 600_000);
            }
        }
        db
    }

    #[test]
    fn evicts_until_under_budget() {
        let accountant = MemoryAccountant::new();
        let mut db = filled_db(EvictionPolicy::AllKeysLru, &accountant, 100);
        let mut pool = EvictionPool::new();

        let budget = accountant.used_bytes() / 2;
        let outcome = perform_evictions(&mut db, &mut pool, &accountant, budget, lru_clock_now());

        assert_eq!(outcome, EvictOutcome::Ok);
        assert!(accountant.used_bytes() <= budget);
        assert!(db.len() < 100);
    }

    #[test]
    fn volatile_policy_evicts_only_keys_with_ttl() {
        let accountant = MemoryAccountant::new();
        let mut db = Db::new(0, EvictionPolicy::VolatileLru, accountant.clone());
        for i in 0..50 {
            db.set_key(
                &key(i),
                Object::string(Bytes::from(vec![b'x'; 64]), 0),
                SetFlags::NONE,
                0,
            );
        }
        // only ten keys are volatile
        for i in 0..10 {
            db.set_expire(&key(i), time::mstime() + 600_000);
        }
        let mut pool = EvictionPool::new();

        // ask for the impossible: a budget below what the persistent
        // keys alone occupy
        let outcome = perform_evictions(&mut db, &mut pool, &accountant, 100, lru_clock_now());
        assert_eq!(outcome, EvictOutcome::Fail);
        // every volatile key is gone, nothing else was touched
        assert_eq!(db.expires_len(), 0);
        assert_eq!(db.len(), 40);
    }

    #[test]
    fn noeviction_policy_fails_immediately() {
        let accountant = MemoryAccountant::new();
        let mut db = filled_db(EvictionPolicy::NoEviction, &accountant, 10);
        let mut pool = EvictionPool::new();

        let outcome = perform_evictions(&mut db, &mut pool, &accountant, 1, lru_clock_now());
        assert_eq!(outcome, EvictOutcome::Fail);
        assert_eq!(db.len(), 10);
    }

    #[test]
    fn already_under_budget_is_ok() {
        let accountant = MemoryAccountant::new();
        let mut db = filled_db(EvictionPolicy::AllKeysLru, &accountant, 5);
        let mut pool = EvictionPool::new();

        let outcome =
            perform_evictions(&mut db, &mut pool, &accountant, i64::MAX, lru_clock_now());
        assert_eq!(outcome, EvictOutcome::Ok);
        assert_eq!(db.len(), 5);
    }

    #[test]
    fn stale_pool_entries_are_skipped() {
        let accountant = MemoryAccountant::new();
        let mut db = filled_db(EvictionPolicy::AllKeysLru, &accountant, 30);
        let mut pool = EvictionPool::new();

        pool.populate(&db, lru_clock_now());
        // delete everything the pool just saw, turning it all into ghosts
        let pooled: Vec<Bytes> = pool.slots.iter().flatten().map(|e| e.key.clone()).collect();
        for k in &pooled {
            db.delete(k);
        }

        let budget = accountant.used_bytes() / 2;
        let outcome = perform_evictions(&mut db, &mut pool, &accountant, budget, lru_clock_now());
        assert_eq!(outcome, EvictOutcome::Ok);
        assert!(accountant.used_bytes() <= budget);
    }

    #[test]
    fn prefers_the_idlest_keys() {
        let accountant = MemoryAccountant::new();
        let mut db = Db::new(0, EvictionPolicy::AllKeysLru, accountant.clone());
        let now = lru_clock_now();

        // one very idle key among fresh ones; keep the keyspace at the
        // sample size so every populate round sees all of them
        let stale_stamp = (now as u64 + LRU_CLOCK_MAX - 5000) as u32 & LRU_CLOCK_MAX as u32;
        db.set_key(
            &Bytes::from_static(b"ancient"),
            Object::string(Bytes::from(vec![b'x'; 64]), stale_stamp),
            SetFlags::NONE,
            0,
        );
        for i in 0..MEMORY_SAMPLES - 1 {
            db.set_key(
                &key(i),
                Object::string(Bytes::from(vec![b'x'; 64]), now),
                SetFlags::NONE,
                0,
            );
        }

        let mut pool = EvictionPool::new();
        // evict exactly one key's worth of bytes
        let budget = accountant.used_bytes() - 1;
        let outcome = perform_evictions(&mut db, &mut pool, &accountant, budget, now);
        assert_eq!(outcome, EvictOutcome::Ok);
        assert!(!db.data_dict().contains_key(b"ancient"));
        assert_eq!(db.len(), MEMORY_SAMPLES - 1);
    }
}
