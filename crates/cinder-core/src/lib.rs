//! cinder-core: the storage engine.
//!
//! Owns the keyspace, the incrementally-rehashing dictionary, the object
//! model, TTL bookkeeping, memory accounting, and approximated-LRU
//! eviction. Designed around a single-threaded reactor that exclusively
//! owns every keyspace; no internal locking.

pub mod db;
pub mod dict;
pub mod dlist;
pub mod evict;
pub mod memory;
pub mod object;
pub mod time;

pub use db::{Db, LookupFlags, SetFlags};
pub use dict::Dict;
pub use dlist::List;
pub use evict::{EvictOutcome, EvictionPolicy, EvictionPool, LruClock};
pub use memory::{MemUsage, MemoryAccountant};
pub use object::{Encoding, Object, ObjectKind, Payload};
