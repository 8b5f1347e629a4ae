//! Iterator Module
//!
//! Shared iterator machinery for reads and compaction.
//!
//! Every source — memtable snapshot, table scan — yields the same item shape:
//! `(key, sequence, value-or-tombstone)` in ascending key order, at most one
//! entry per key per source. The merge iterator combines any number of such
//! sources into one deduplicated stream.

mod merge;

pub use merge::MergeIterator;

use crate::error::Result;

/// One versioned entry flowing through iterators.
pub type KvEntry = (Vec<u8>, u64, Option<Vec<u8>>);

/// A boxed, fallible, key-ordered entry source.
pub type EntrySource = Box<dyn Iterator<Item = Result<KvEntry>>>;
