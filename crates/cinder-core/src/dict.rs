//! Incrementally-rehashing hash table.
//!
//! A [`Dict`] is a chained hash table backed by two bucket arrays. When
//! the load factor crosses the threshold a second array of twice the size
//! is allocated and entries migrate a few buckets at a time, one step per
//! mutating operation, so no single operation ever pays the full-table
//! cost. While a rehash is in flight the key set is partitioned between
//! the tail of the primary table and the secondary table; lookups probe
//! the secondary table first.
//!
//! Every insertion, update, and deletion reports its byte delta to the
//! shared [`MemoryAccountant`], which is what the eviction engine budgets
//! against.

use std::collections::HashSet;
use std::hash::BuildHasher;

use ahash::RandomState;
use bytes::Bytes;
use rand::Rng;

use crate::memory::{entry_cost, MemUsage, MemoryAccountant};

/// Rehashing starts when `count / buckets` exceeds this.
const LOAD_FACTOR: f64 = 0.7;

/// Buckets migrated per rehash step.
const REHASH_BATCH: usize = 10;

/// Bucket count of a freshly-created table.
pub const INITIAL_CAPACITY: usize = 16;

struct Node<V> {
    key: Bytes,
    value: V,
    next: Link<V>,
}

type Link<V> = Option<Box<Node<V>>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Table {
    Primary,
    Secondary,
}

#[derive(Clone, Copy)]
struct Location {
    table: Table,
    bucket: usize,
    pos: usize,
}

/// Chained hash table with stepwise resize and memory accounting.
pub struct Dict<V> {
    primary: Vec<Link<V>>,
    /// Empty unless a rehash is in flight.
    secondary: Vec<Link<V>>,
    /// Next primary bucket to migrate; -1 when not rehashing.
    rehash_idx: isize,
    count: usize,
    hasher: RandomState,
    accountant: MemoryAccountant,
}

impl<V: MemUsage> Dict<V> {
    /// Creates an empty dict with the default initial capacity.
    pub fn new(accountant: MemoryAccountant) -> Self {
        Self::with_capacity(INITIAL_CAPACITY, accountant)
    }

    /// Creates an empty dict with `capacity` buckets (rounded up to a
    /// power of two).
    pub fn with_capacity(capacity: usize, accountant: MemoryAccountant) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        Self {
            primary: new_table(capacity),
            secondary: Vec::new(),
            rehash_idx: -1,
            count: 0,
            hasher: RandomState::new(),
            accountant,
        }
    }

    /// Number of entries across both backing tables.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `true` while entries are migrating to the secondary table.
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx >= 0
    }

    /// Bucket count of the primary table.
    pub fn capacity(&self) -> usize {
        self.primary.len()
    }

    fn hash(&self, key: &[u8]) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Looks up a key without mutating the table.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let h = self.hash(key);
        if self.is_rehashing() {
            let b = bucket(h, self.secondary.len());
            if let Some(node) = chain_find(&self.secondary[b], key) {
                return Some(&node.value);
            }
        }
        let b = bucket(h, self.primary.len());
        chain_find(&self.primary[b], key).map(|n| &n.value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Returns a mutable handle to the stored value, if present.
    /// Never migrates buckets.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let h = self.hash(key);
        let loc = self.locate(key, h)?;
        Some(&mut self.node_mut(loc).value)
    }

    /// Inserts or updates a key. Returns `true` when the key was newly
    /// inserted, `false` when an existing value was replaced.
    ///
    /// Performs one bounded rehash step first when a resize is in flight.
    pub fn insert(&mut self, key: Bytes, value: V) -> bool {
        if self.is_rehashing() {
            self.rehash_step();
        }

        let h = self.hash(&key);
        if let Some(loc) = self.locate(&key, h) {
            let node = self.node_mut(loc);
            let old = node.value.mem_usage();
            let new = value.mem_usage();
            node.value = value;
            self.accountant.sub(old);
            self.accountant.add(new);
            return false;
        }

        self.push_new(key, value, h);
        self.maybe_start_rehash();
        true
    }

    /// Locates or inserts an entry, returning a handle to the slot and
    /// whether the key pre-existed. The inserted default is accounted;
    /// callers that grow the value in place afterwards report the delta
    /// through the accountant themselves.
    pub fn entry_or_insert_with(
        &mut self,
        key: Bytes,
        default: impl FnOnce() -> V,
    ) -> (&mut V, bool) {
        if self.is_rehashing() {
            self.rehash_step();
        }

        let h = self.hash(&key);
        if let Some(loc) = self.locate(&key, h) {
            return (&mut self.node_mut(loc).value, true);
        }

        let loc = self.push_new(key, default(), h);
        self.maybe_start_rehash();
        // the head position stays valid: maybe_start_rehash only sets up
        // the secondary table, it migrates nothing
        (&mut self.node_mut(loc).value, false)
    }

    /// Removes a key. Returns the stored value when the key existed.
    ///
    /// While rehashing the key may live in either table, so both are
    /// probed.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        if self.is_rehashing() {
            self.rehash_step();
        }

        let h = self.hash(key);
        let removed = if self.is_rehashing() {
            let b = bucket(h, self.secondary.len());
            chain_remove(&mut self.secondary[b], key).or_else(|| {
                let b = bucket(h, self.primary.len());
                chain_remove(&mut self.primary[b], key)
            })
        } else {
            let b = bucket(h, self.primary.len());
            chain_remove(&mut self.primary[b], key)
        };

        removed.map(|node| {
            self.count -= 1;
            self.accountant.sub(entry_cost(&node.key, &node.value));
            node.value
        })
    }

    /// Removes every entry and releases its accounting.
    pub fn clear(&mut self) {
        let cap = self.primary.len();
        for slot in self.primary.iter_mut().chain(self.secondary.iter_mut()) {
            let mut chain = slot.take();
            while let Some(mut node) = chain {
                chain = node.next.take();
                self.accountant.sub(entry_cost(&node.key, &node.value));
            }
        }
        self.primary = new_table(cap.min(INITIAL_CAPACITY).max(2));
        self.secondary = Vec::new();
        self.rehash_idx = -1;
        self.count = 0;
    }

    /// Samples up to `n` keys by picking random buckets and taking every
    /// entry in each sampled bucket. Buckets are not revisited within one
    /// call. Returns fewer than `n` keys when the dict is smaller.
    pub fn sample_keys(&self, n: usize) -> Vec<Bytes> {
        if self.count == 0 || n == 0 {
            return Vec::new();
        }
        let want = n.min(self.count);
        let total = self.primary.len() + self.secondary.len();

        let mut rng = rand::rng();
        let mut visited = HashSet::new();
        let mut keys = Vec::with_capacity(want);

        while keys.len() < want && visited.len() < total {
            let i = rng.random_range(0..total);
            if !visited.insert(i) {
                continue;
            }
            let slot = if i < self.primary.len() {
                &self.primary[i]
            } else {
                &self.secondary[i - self.primary.len()]
            };
            let mut cur = slot.as_deref();
            while let Some(node) = cur {
                if keys.len() == want {
                    break;
                }
                keys.push(node.key.clone());
                cur = node.next.as_deref();
            }
        }
        keys
    }

    /// Iterates over every entry in both tables.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .flat_map(|slot| ChainIter {
                cur: slot.as_deref(),
            })
    }

    /// Inserts a fresh node at the head of the target bucket and accounts
    /// for it. The target is the secondary table while rehashing.
    fn push_new(&mut self, key: Bytes, value: V, h: u64) -> Location {
        self.accountant.add(entry_cost(&key, &value));
        let (table, slots) = if self.is_rehashing() {
            (Table::Secondary, &mut self.secondary)
        } else {
            (Table::Primary, &mut self.primary)
        };
        let b = bucket(h, slots.len());
        let node = Box::new(Node {
            key,
            value,
            next: slots[b].take(),
        });
        slots[b] = Some(node);
        self.count += 1;
        Location {
            table,
            bucket: b,
            pos: 0,
        }
    }

    /// Finds which table/bucket/chain-position holds `key`, probing the
    /// secondary table first while rehashing.
    fn locate(&self, key: &[u8], h: u64) -> Option<Location> {
        if self.is_rehashing() {
            let b = bucket(h, self.secondary.len());
            if let Some(pos) = chain_position(&self.secondary[b], key) {
                return Some(Location {
                    table: Table::Secondary,
                    bucket: b,
                    pos,
                });
            }
        }
        let b = bucket(h, self.primary.len());
        chain_position(&self.primary[b], key).map(|pos| Location {
            table: Table::Primary,
            bucket: b,
            pos,
        })
    }

    fn node_mut(&mut self, loc: Location) -> &mut Node<V> {
        let slots = match loc.table {
            Table::Primary => &mut self.primary,
            Table::Secondary => &mut self.secondary,
        };
        let mut node = slots[loc.bucket].as_mut().expect("located entry");
        for _ in 0..loc.pos {
            node = node.next.as_mut().expect("located entry");
        }
        node
    }

    fn maybe_start_rehash(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.count as f64 / self.primary.len() as f64 > LOAD_FACTOR {
            self.secondary = new_table(self.primary.len() * 2);
            self.rehash_idx = 0;
        }
    }

    /// Migrates up to [`REHASH_BATCH`] primary buckets into the secondary
    /// table. When the cursor reaches the end, the secondary table becomes
    /// the primary one.
    fn rehash_step(&mut self) {
        let mut moved = 0;
        while moved < REHASH_BATCH && (self.rehash_idx as usize) < self.primary.len() {
            let idx = self.rehash_idx as usize;
            let mut chain = self.primary[idx].take();
            while let Some(mut node) = chain {
                chain = node.next.take();
                let h = self.hash(&node.key);
                let b = bucket(h, self.secondary.len());
                node.next = self.secondary[b].take();
                self.secondary[b] = Some(node);
            }
            self.rehash_idx += 1;
            moved += 1;
        }

        if self.rehash_idx as usize == self.primary.len() {
            self.primary = std::mem::take(&mut self.secondary);
            self.rehash_idx = -1;
        }
    }
}

fn new_table<V>(capacity: usize) -> Vec<Link<V>> {
    (0..capacity).map(|_| None).collect()
}

#[inline]
fn bucket(hash: u64, len: usize) -> usize {
    hash as usize & (len - 1)
}

fn chain_find<'a, V>(slot: &'a Link<V>, key: &[u8]) -> Option<&'a Node<V>> {
    let mut cur = slot.as_deref();
    while let Some(node) = cur {
        if node.key.as_ref() == key {
            return Some(node);
        }
        cur = node.next.as_deref();
    }
    None
}

fn chain_position<V>(slot: &Link<V>, key: &[u8]) -> Option<usize> {
    let mut cur = slot.as_deref();
    let mut pos = 0;
    while let Some(node) = cur {
        if node.key.as_ref() == key {
            return Some(pos);
        }
        cur = node.next.as_deref();
        pos += 1;
    }
    None
}

/// Detaches the whole chain and relinks every node except the match.
/// Chain order within a bucket carries no meaning, so the reversal from
/// head re-insertion is fine.
fn chain_remove<V>(slot: &mut Link<V>, key: &[u8]) -> Option<Box<Node<V>>> {
    let mut src = slot.take();
    let mut kept: Link<V> = None;
    let mut removed = None;
    while let Some(mut node) = src {
        src = node.next.take();
        if removed.is_none() && node.key.as_ref() == key {
            removed = Some(node);
        } else {
            node.next = kept;
            kept = Some(node);
        }
    }
    *slot = kept;
    removed
}

struct ChainIter<'a, V> {
    cur: Option<&'a Node<V>>,
}

impl<'a, V> Iterator for ChainIter<'a, V> {
    type Item = (&'a Bytes, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cur?;
        self.cur = node.next.as_deref();
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> Dict<u64> {
        Dict::new(MemoryAccountant::new())
    }

    fn key(i: usize) -> Bytes {
        Bytes::from(format!("key:{i}"))
    }

    #[test]
    fn insert_get_remove() {
        let mut d = dict();
        assert!(d.insert(Bytes::from_static(b"a"), 1));
        assert_eq!(d.get(b"a"), Some(&1));
        assert!(!d.insert(Bytes::from_static(b"a"), 2));
        assert_eq!(d.get(b"a"), Some(&2));
        assert_eq!(d.remove(b"a"), Some(2));
        assert_eq!(d.get(b"a"), None);
        assert_eq!(d.remove(b"a"), None);
    }

    #[test]
    fn len_counts_distinct_keys() {
        let mut d = dict();
        for i in 0..50 {
            d.insert(key(i), i as u64);
        }
        // updates must not inflate the count
        for i in 0..50 {
            d.insert(key(i), 0);
        }
        assert_eq!(d.len(), 50);
    }

    #[test]
    fn rehash_triggers_just_past_load_factor() {
        let mut d = dict();
        assert_eq!(d.capacity(), INITIAL_CAPACITY);
        for i in 0..11 {
            d.insert(key(i), 0);
        }
        // 11/16 = 0.6875, still below the threshold
        assert!(!d.is_rehashing());
        d.insert(key(11), 0);
        // 12/16 = 0.75 crosses 0.7
        assert!(d.is_rehashing());
    }

    #[test]
    fn rehash_completes_and_doubles_capacity() {
        let mut d = dict();
        for i in 0..12 {
            d.insert(key(i), i as u64);
        }
        assert!(d.is_rehashing());
        // each mutation migrates up to 10 buckets; a couple of writes
        // finish the 16-bucket migration
        d.insert(key(100), 100);
        d.insert(key(101), 101);
        assert!(!d.is_rehashing());
        assert_eq!(d.capacity(), INITIAL_CAPACITY * 2);
        for i in 0..12 {
            assert_eq!(d.get(&key(i)), Some(&(i as u64)));
        }
    }

    #[test]
    fn reads_and_writes_are_consistent_mid_rehash() {
        let mut d = dict();
        for i in 0..12 {
            d.insert(key(i), i as u64);
        }
        assert!(d.is_rehashing());

        // overwrite and delete while entries straddle both tables
        d.insert(key(3), 333);
        assert!(d.remove(&key(5)).is_some());
        d.insert(key(20), 20);

        assert_eq!(d.get(&key(3)), Some(&333));
        assert_eq!(d.get(&key(5)), None);
        assert_eq!(d.get(&key(20)), Some(&20));
        assert_eq!(d.len(), 12);
    }

    #[test]
    fn mirrors_a_reference_map_under_churn() {
        let mut d = dict();
        let mut reference = std::collections::HashMap::new();

        for round in 0..400usize {
            let k = key(round % 37);
            if round % 3 == 0 {
                d.remove(&k);
                reference.remove(&k);
            } else {
                d.insert(k.clone(), round as u64);
                reference.insert(k, round as u64);
            }
        }

        assert_eq!(d.len(), reference.len());
        for (k, v) in &reference {
            assert_eq!(d.get(k), Some(v));
        }
    }

    #[test]
    fn entry_or_insert_reports_pre_existence() {
        let mut d = dict();
        let (slot, existed) = d.entry_or_insert_with(Bytes::from_static(b"x"), || 7);
        assert!(!existed);
        *slot = 8;
        let (slot, existed) = d.entry_or_insert_with(Bytes::from_static(b"x"), || 0);
        assert!(existed);
        assert_eq!(*slot, 8);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn sample_fewer_keys_than_requested() {
        let mut d = dict();
        d.insert(key(1), 1);
        d.insert(key(2), 2);
        let sampled = d.sample_keys(10);
        assert_eq!(sampled.len(), 2);
    }

    #[test]
    fn sample_from_empty_dict() {
        let d = dict();
        assert!(d.sample_keys(5).is_empty());
    }

    #[test]
    fn sampling_sees_keys_during_rehash() {
        let mut d = dict();
        for i in 0..13 {
            d.insert(key(i), 0);
        }
        assert!(d.is_rehashing());
        let sampled = d.sample_keys(13);
        assert_eq!(sampled.len(), 13);
    }

    #[test]
    fn accounting_returns_to_baseline() {
        let acct = MemoryAccountant::new();
        let mut d: Dict<u64> = Dict::new(acct.clone());

        assert_eq!(acct.used_bytes(), 0);
        for i in 0..30 {
            d.insert(key(i), i as u64);
        }
        assert!(acct.used_bytes() > 0);
        for i in 0..30 {
            d.remove(&key(i));
        }
        assert_eq!(acct.used_bytes(), 0);
    }

    #[test]
    fn accounting_is_monotone_under_inserts() {
        let acct = MemoryAccountant::new();
        let mut d: Dict<u64> = Dict::new(acct.clone());
        let mut last = 0;
        for i in 0..40 {
            d.insert(key(i), 0);
            let used = acct.used_bytes();
            assert!(used > last);
            last = used;
        }
    }

    #[test]
    fn clear_resets_everything() {
        let acct = MemoryAccountant::new();
        let mut d: Dict<u64> = Dict::new(acct.clone());
        for i in 0..20 {
            d.insert(key(i), 0);
        }
        d.clear();
        assert_eq!(d.len(), 0);
        assert!(!d.is_rehashing());
        assert_eq!(acct.used_bytes(), 0);
        assert_eq!(d.get(&key(3)), None);
    }

    #[test]
    fn iter_visits_both_tables() {
        let mut d = dict();
        for i in 0..12 {
            d.insert(key(i), i as u64);
        }
        assert!(d.is_rehashing());
        let mut seen: Vec<u64> = d.iter().map(|(_, v)| *v).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<u64>>());
    }
}
