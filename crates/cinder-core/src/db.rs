//! The keyspace: one logical database.
//!
//! A [`Db`] owns two parallel dictionaries — key → value object, and
//! key → absolute expiry deadline in unix milliseconds. Expired keys are
//! removed lazily on access and by the periodic expiry cycle. Every key
//! with a deadline also exists in the data dict; removal from the data
//! dict always removes the deadline too.

use bytes::Bytes;

use crate::dict::Dict;
use crate::evict::EvictionPolicy;
use crate::memory::MemoryAccountant;
use crate::object::Object;
use crate::time;

/// Behavior switches for [`Db::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LookupFlags(u8);

impl LookupFlags {
    pub const NONE: LookupFlags = LookupFlags(0);
    /// Don't refresh the value's LRU stamp on a hit.
    pub const NO_TOUCH: LookupFlags = LookupFlags(1 << 0);
    /// Don't update the hit/miss counters.
    pub const NO_STATS: LookupFlags = LookupFlags(1 << 1);
    /// Don't expire-delete; an elapsed key is still reported live.
    pub const NO_EXPIRE: LookupFlags = LookupFlags(1 << 2);

    pub fn contains(self, other: LookupFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LookupFlags {
    type Output = LookupFlags;
    fn bitor(self, rhs: LookupFlags) -> LookupFlags {
        LookupFlags(self.0 | rhs.0)
    }
}

/// Behavior switches for [`Db::set_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetFlags(u8);

impl SetFlags {
    pub const NONE: SetFlags = SetFlags(0);
    /// Preserve any existing expiry instead of clearing it.
    pub const KEEP_TTL: SetFlags = SetFlags(1 << 0);
    /// The caller already proved the key exists; skip the probe.
    pub const ALREADY_EXISTS: SetFlags = SetFlags(1 << 1);
    /// The caller already proved the key is absent; skip the probe.
    pub const DOES_NOT_EXIST: SetFlags = SetFlags(1 << 2);
    /// Upsert without caring about prior existence.
    pub const ADD_OR_UPDATE: SetFlags = SetFlags(1 << 3);

    pub fn contains(self, other: SetFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SetFlags {
    type Output = SetFlags;
    fn bitor(self, rhs: SetFlags) -> SetFlags {
        SetFlags(self.0 | rhs.0)
    }
}

/// One logical database: keyspace, expiry index, and access stats.
pub struct Db {
    id: u32,
    data: Dict<Object>,
    expire: Dict<u64>,
    hits: u64,
    misses: u64,
    policy: EvictionPolicy,
}

impl Db {
    pub fn new(id: u32, policy: EvictionPolicy, accountant: MemoryAccountant) -> Self {
        Self {
            id,
            data: Dict::new(accountant.clone()),
            expire: Dict::new(accountant),
            hits: 0,
            misses: 0,
            policy,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Number of live keys (expired-but-unreaped keys included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of keys carrying an expiry deadline.
    pub fn expires_len(&self) -> usize {
        self.expire.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Looks up a key for reading. Touches the LRU stamp and updates the
    /// hit/miss counters.
    pub fn lookup_read(&mut self, key: &[u8], clock: u32) -> Option<&Object> {
        self.lookup(key, LookupFlags::NONE, clock)
    }

    /// Looks up a key on a write path. Identical to [`Db::lookup_read`]
    /// on a single node; replicas would pass expire-delete suppression
    /// through here.
    pub fn lookup_write(&mut self, key: &[u8], clock: u32) -> Option<&Object> {
        self.lookup(key, LookupFlags::NONE, clock)
    }

    /// Flag-controlled lookup. Expired keys are deleted on the way in
    /// (unless suppressed) and reported absent.
    pub fn lookup(&mut self, key: &[u8], flags: LookupFlags, clock: u32) -> Option<&Object> {
        if self.expire_if_needed(key, flags) {
            if !flags.contains(LookupFlags::NO_STATS) {
                self.misses += 1;
            }
            return None;
        }

        if self.data.contains_key(key) {
            if !flags.contains(LookupFlags::NO_TOUCH) {
                if let Some(obj) = self.data.get_mut(key) {
                    obj.touch(clock);
                }
            }
            if !flags.contains(LookupFlags::NO_STATS) {
                self.hits += 1;
            }
            self.data.get(key)
        } else {
            if !flags.contains(LookupFlags::NO_STATS) {
                self.misses += 1;
            }
            None
        }
    }

    /// Stores a value under `key`, resolving the write path from the
    /// flags. Unless `KEEP_TTL` is set, any existing expiry is cleared.
    pub fn set_key(&mut self, key: &Bytes, value: Object, flags: SetFlags, clock: u32) {
        let existed = if flags.contains(SetFlags::ALREADY_EXISTS) {
            true
        } else if flags.contains(SetFlags::DOES_NOT_EXIST) {
            false
        } else if flags.contains(SetFlags::ADD_OR_UPDATE) {
            self.data.contains_key(key)
        } else {
            self.lookup_write(key, clock).is_some()
        };

        let newly = self.data.insert(key.clone(), value);
        debug_assert_eq!(newly, !existed, "set_key existence flag disagrees with the dict");

        if !flags.contains(SetFlags::KEEP_TTL) {
            self.remove_expire(key);
        }
    }

    /// Attaches an absolute expiry deadline (unix ms) to an existing key.
    /// No-op when the key is not in the keyspace.
    pub fn set_expire(&mut self, key: &Bytes, deadline_ms: u64) {
        if !self.data.contains_key(key) {
            return;
        }
        self.expire.insert(key.clone(), deadline_ms);
    }

    /// Drops the expiry deadline. Returns `true` if one was present.
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expire.remove(key).is_some()
    }

    /// Returns the expiry deadline in unix ms, or -1 when none is set.
    pub fn get_expire(&self, key: &[u8]) -> i64 {
        match self.expire.get(key) {
            Some(&when) => when as i64,
            None => -1,
        }
    }

    /// Removes a key from the keyspace and its expiry index.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let existed = self.data.remove(key).is_some();
        if existed {
            self.expire.remove(key);
        }
        existed
    }

    /// Drops every key in this database.
    pub fn flush(&mut self) {
        self.data.clear();
        self.expire.clear();
    }

    /// Samples up to `samples` keys from the expiry index and reaps the
    /// elapsed ones. Returns the number of keys removed. Called from the
    /// server's periodic tick so abandoned keys don't linger until the
    /// next access.
    pub fn expire_cycle(&mut self, samples: usize) -> usize {
        let now = time::mstime();
        let candidates = self.expire.sample_keys(samples);
        let mut removed = 0;
        for key in candidates {
            let elapsed = matches!(self.expire.get(&key), Some(&when) if now >= when);
            if elapsed && self.delete(&key) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(db = self.id, removed, "expiry cycle reaped keys");
        }
        removed
    }

    /// Deletes `key` if its deadline has elapsed. Returns `true` when the
    /// key was expired (and, unless suppressed, removed).
    fn expire_if_needed(&mut self, key: &[u8], flags: LookupFlags) -> bool {
        let Some(&when) = self.expire.get(key) else {
            return false;
        };
        if time::mstime() < when {
            return false;
        }
        if flags.contains(LookupFlags::NO_EXPIRE) {
            // suppressed: report the key live even though it has elapsed
            return false;
        }
        self.delete(key);
        true
    }

    pub(crate) fn data_dict(&self) -> &Dict<Object> {
        &self.data
    }

    pub(crate) fn expire_dict(&self) -> &Dict<u64> {
        &self.expire
    }
}
