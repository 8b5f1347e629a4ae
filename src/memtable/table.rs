//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.
//!
//! Each key maps to its newest entry: (sequence number, value-or-tombstone).
//! Older versions of a key never survive inside one memtable; the sequence
//! number is what orders the survivor against older sorted tables.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::MemTableEntry;

/// Fixed per-entry overhead charged against the flush threshold
/// (key length prefix, sequence number, map node).
const ENTRY_OVERHEAD: usize = 32;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, (u64, MemTableEntry)>>,

    /// Approximate payload size in bytes (lock-free read for flush checks).
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Insert an entry, replacing any older version of the key.
    ///
    /// Called only by the engine's serialized writer, after the WAL append
    /// has succeeded.
    pub fn insert(&self, key: Vec<u8>, seq: u64, entry: MemTableEntry) {
        let key_len = key.len();
        let value_len = entry.value_len();

        let mut data = self.data.write();
        match data.insert(key, (seq, entry)) {
            Some((_, old)) => {
                // The key and its fixed overhead were charged by the first
                // insert; an overwrite only moves the total by the value
                // delta.
                let old_len = old.value_len();
                if value_len >= old_len {
                    self.size.fetch_add(value_len - old_len, Ordering::Relaxed);
                } else {
                    self.size.fetch_sub(old_len - value_len, Ordering::Relaxed);
                }
            }
            None => {
                self.size
                    .fetch_add(key_len + value_len + ENTRY_OVERHEAD, Ordering::Relaxed);
            }
        }
    }

    /// Get the newest entry for a key (read lock)
    pub fn get(&self, key: &[u8]) -> Option<(u64, MemTableEntry)> {
        self.data.read().get(key).cloned()
    }

    /// Copy all entries within `[start, end)` in key order.
    ///
    /// An unbounded side is expressed with `None`. The copy is the reader's
    /// point-in-time snapshot; later writes do not affect it.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<(Vec<u8>, u64, MemTableEntry)> {
        let lower = match start {
            Some(k) => Bound::Included(k.to_vec()),
            None => Bound::Unbounded,
        };
        let upper = match end {
            Some(k) => Bound::Excluded(k.to_vec()),
            None => Bound::Unbounded,
        };

        self.data
            .read()
            .range((lower, upper))
            .map(|(k, (seq, entry))| (k.clone(), *seq, entry.clone()))
            .collect()
    }

    /// Copy out every entry in sorted key order (for flushing).
    pub fn entries(&self) -> Vec<(Vec<u8>, u64, MemTableEntry)> {
        self.scan(None, None)
    }

    /// Approximate size in bytes
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_seq_wins() {
        let table = MemTable::new();
        table.insert(b"a".to_vec(), 1, MemTableEntry::Value(b"1".to_vec()));
        table.insert(b"a".to_vec(), 2, MemTableEntry::Value(b"2".to_vec()));

        let (seq, entry) = table.get(b"a").unwrap();
        assert_eq!(seq, 2);
        assert_eq!(entry, MemTableEntry::Value(b"2".to_vec()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn tombstone_is_stored_not_removed() {
        let table = MemTable::new();
        table.insert(b"a".to_vec(), 1, MemTableEntry::Value(b"1".to_vec()));
        table.insert(b"a".to_vec(), 2, MemTableEntry::Tombstone);

        let (seq, entry) = table.get(b"a").unwrap();
        assert_eq!(seq, 2);
        assert_eq!(entry, MemTableEntry::Tombstone);
    }

    #[test]
    fn scan_respects_bounds() {
        let table = MemTable::new();
        for (i, key) in [b"a", b"b", b"c", b"d"].iter().enumerate() {
            table.insert(key.to_vec(), i as u64, MemTableEntry::Value(vec![i as u8]));
        }

        let hits = table.scan(Some(b"b"), Some(b"d"));
        let keys: Vec<_> = hits.iter().map(|(k, _, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn size_tracks_inserts() {
        let table = MemTable::new();
        assert_eq!(table.approximate_size(), 0);

        table.insert(b"key".to_vec(), 1, MemTableEntry::Value(vec![0u8; 100]));
        let after_first = table.approximate_size();
        assert!(after_first >= 100);

        // Overwriting with a smaller value should not grow the total by 100.
        table.insert(b"key".to_vec(), 2, MemTableEntry::Value(vec![0u8; 10]));
        assert!(table.approximate_size() < after_first + 100);
    }

    #[test]
    fn overwrites_do_not_inflate_size() {
        let table = MemTable::new();
        table.insert(b"key".to_vec(), 1, MemTableEntry::Value(vec![0u8; 100]));
        let first = table.approximate_size();

        // Same key, same value size: the total must not creep upward.
        for seq in 2..50 {
            table.insert(b"key".to_vec(), seq, MemTableEntry::Value(vec![0u8; 100]));
        }
        assert_eq!(table.approximate_size(), first);

        // A tombstone releases the whole old value.
        table.insert(b"key".to_vec(), 50, MemTableEntry::Tombstone);
        assert_eq!(table.approximate_size(), first - 100);
    }
}
