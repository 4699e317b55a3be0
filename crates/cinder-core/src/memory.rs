//! Memory accounting for the keyspace.
//!
//! A [`MemoryAccountant`] is a cloneable handle over a single atomic byte
//! counter. The dictionary calls `add`/`sub` on every insertion, update,
//! and deletion, so the counter always reflects the bytes logically
//! attributable to stored keys and values.
//!
//! The counter is a *proxy*, not a heap measurement: sizes come from the
//! per-variant estimates below (fixed headers plus payload lengths).
//! Overestimating is harmless (eviction triggers a little early);
//! underestimating lets usage creep past the configured limit. The counter
//! is atomic so that a future background thread (an AOF writer, say) can
//! observe a consistent value even though all mutations happen on the
//! reactor thread today.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Estimated header cost of a heap-allocated byte string
/// (pointer + length + capacity on 64-bit).
pub const STRING_HEADER: usize = 16;

/// Estimated header cost of a growable collection (buffer pointer,
/// length, capacity).
pub const COLLECTION_HEADER: usize = 24;

/// Estimated per-entry bookkeeping inside a dictionary: the chain node
/// (key handle + value + next pointer) plus bucket slot amortisation.
pub const DICT_ENTRY_OVERHEAD: usize = 48;

/// Types that can report their estimated payload size in bytes.
///
/// Implemented by everything stored in a [`crate::dict::Dict`] so the
/// accountant can observe value replacement without knowing the type.
pub trait MemUsage {
    fn mem_usage(&self) -> usize;
}

impl MemUsage for u64 {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}

/// Process-wide byte counter, shared by every dictionary in the engine.
///
/// Cheap to clone; all clones update the same counter.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccountant {
    used: Arc<AtomicI64>,
}

impl MemoryAccountant {
    /// Creates an accountant with zero usage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `n` bytes allocated.
    #[inline]
    pub fn add(&self, n: usize) {
        self.used.fetch_add(n as i64, Ordering::Relaxed);
    }

    /// Records `n` bytes released.
    #[inline]
    pub fn sub(&self, n: usize) {
        self.used.fetch_sub(n as i64, Ordering::Relaxed);
    }

    /// Returns the current estimated usage in bytes.
    #[inline]
    pub fn used_bytes(&self) -> i64 {
        self.used.load(Ordering::Relaxed)
    }
}

/// Estimated total cost of one dictionary entry: key bytes + key header +
/// value payload + fixed entry overhead.
pub fn entry_cost<V: MemUsage>(key: &[u8], value: &V) -> usize {
    key.len() + STRING_HEADER + value.mem_usage() + DICT_ENTRY_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accountant_is_zero() {
        let a = MemoryAccountant::new();
        assert_eq!(a.used_bytes(), 0);
    }

    #[test]
    fn add_then_sub_returns_to_baseline() {
        let a = MemoryAccountant::new();
        a.add(100);
        a.add(250);
        assert_eq!(a.used_bytes(), 350);
        a.sub(250);
        a.sub(100);
        assert_eq!(a.used_bytes(), 0);
    }

    #[test]
    fn clones_share_the_counter() {
        let a = MemoryAccountant::new();
        let b = a.clone();
        a.add(64);
        assert_eq!(b.used_bytes(), 64);
        b.sub(64);
        assert_eq!(a.used_bytes(), 0);
    }

    #[test]
    fn entry_cost_accounts_for_key_and_value() {
        let cost = entry_cost(b"mykey", &7u64);
        assert_eq!(cost, 5 + STRING_HEADER + 8 + DICT_ENTRY_OVERHEAD);
    }
}
