//! K-way merge over sorted entry sources.
//!
//! A min-heap keyed on (key ASC, sequence DESC) merges any number of sorted
//! sources — the same algorithm as external merge sort. When several sources
//! carry the same user key, only the entry with the highest sequence number
//! is yielded; the stale versions are consumed and dropped.
//!
//! Tombstones are passed through: range scans filter them at the facade, and
//! compaction needs to see them to decide whether they can finally be
//! discarded.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;

use super::{EntrySource, KvEntry};

struct HeapItem {
    key: Vec<u8>,
    seq: u64,
    value: Option<Vec<u8>>,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq && self.source == other.source
    }
}
impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert the key ordering so the smallest
        // key pops first; among equal keys the highest sequence pops first.
        other
            .key
            .cmp(&self.key)
            .then(self.seq.cmp(&other.seq))
            .then(other.source.cmp(&self.source))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges multiple sorted sources into one sorted, deduplicated stream.
///
/// Sources must each be ascending in key with at most one entry per key.
/// Output is ascending in key, exactly one entry per key (the newest).
pub struct MergeIterator {
    sources: Vec<EntrySource>,
    heap: BinaryHeap<HeapItem>,
    /// Set after a source error; the stream is fused from then on.
    failed: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<EntrySource>) -> Result<Self> {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            failed: false,
        };
        for idx in 0..merge.sources.len() {
            merge.refill(idx)?;
        }
        Ok(merge)
    }

    /// Pull the next entry from source `idx` into the heap.
    fn refill(&mut self, idx: usize) -> Result<()> {
        if let Some(item) = self.sources[idx].next() {
            let (key, seq, value) = item?;
            self.heap.push(HeapItem {
                key,
                seq,
                value,
                source: idx,
            });
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<KvEntry>> {
        let winner = match self.heap.pop() {
            Some(item) => item,
            None => return Ok(None),
        };
        self.refill(winner.source)?;

        // Drop stale versions of the same key from older sources.
        while self.heap.peek().map_or(false, |top| top.key == winner.key) {
            if let Some(stale) = self.heap.pop() {
                self.refill(stale.source)?;
            }
        }

        Ok(Some((winner.key, winner.seq, winner.value)))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<KvEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(entries: Vec<(&'static str, u64, Option<&'static str>)>) -> EntrySource {
        Box::new(entries.into_iter().map(|(k, s, v)| {
            Ok((
                k.as_bytes().to_vec(),
                s,
                v.map(|v| v.as_bytes().to_vec()),
            ))
        }))
    }

    fn collect(merge: MergeIterator) -> Vec<(String, u64, Option<String>)> {
        merge
            .map(|r| r.unwrap())
            .map(|(k, s, v)| {
                (
                    String::from_utf8(k).unwrap(),
                    s,
                    v.map(|v| String::from_utf8(v).unwrap()),
                )
            })
            .collect()
    }

    #[test]
    fn merges_disjoint_sources_in_order() {
        let merge = MergeIterator::new(vec![
            source(vec![("a", 1, Some("1")), ("c", 3, Some("3"))]),
            source(vec![("b", 2, Some("2")), ("d", 4, Some("4"))]),
        ])
        .unwrap();

        let keys: Vec<_> = collect(merge).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn newest_version_wins() {
        let merge = MergeIterator::new(vec![
            source(vec![("a", 9, Some("new"))]),
            source(vec![("a", 3, Some("old")), ("b", 4, Some("b"))]),
        ])
        .unwrap();

        let out = collect(merge);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ("a".to_string(), 9, Some("new".to_string())));
    }

    #[test]
    fn tombstones_pass_through() {
        let merge = MergeIterator::new(vec![
            source(vec![("a", 5, None)]),
            source(vec![("a", 2, Some("old"))]),
        ])
        .unwrap();

        let out = collect(merge);
        assert_eq!(out, vec![("a".to_string(), 5, None)]);
    }

    #[test]
    fn empty_sources_yield_nothing() {
        let merge = MergeIterator::new(vec![source(vec![]), source(vec![])]).unwrap();
        assert_eq!(collect(merge).len(), 0);
    }

    #[test]
    fn three_way_interleave() {
        let merge = MergeIterator::new(vec![
            source(vec![("a", 1, Some("x")), ("d", 1, Some("x"))]),
            source(vec![("b", 2, Some("x")), ("d", 9, Some("win"))]),
            source(vec![("c", 3, Some("x")), ("e", 3, Some("x"))]),
        ])
        .unwrap();

        let out = collect(merge);
        let keys: Vec<_> = out.iter().map(|(k, _, _)| k.clone()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(out[3], ("d".to_string(), 9, Some("win".to_string())));
    }
}
