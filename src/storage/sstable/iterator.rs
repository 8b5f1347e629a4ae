//! Table Iterator
//!
//! Lazy, restartable scan over one table's entries in key order.
//!
//! Blocks are read and decoded one at a time; dropping the iterator midway
//! costs nothing. Entries of the current block are materialized on load —
//! a block is a few KiB, so this keeps the borrow structure simple without
//! losing the laziness that matters (per-block disk reads).

use std::sync::Arc;

use crate::error::Result;

use super::block::BlockEntry;
use super::reader::TableReader;

/// Iterator over a table's entries within an optional key range
pub struct TableIterator {
    reader: Arc<TableReader>,
    /// Index of the next block to load.
    next_block: usize,
    /// Entries of the currently loaded block.
    current: Vec<BlockEntry>,
    /// Position within `current`.
    pos: usize,
    /// Inclusive lower bound still pending (applied to the first block only).
    pending_start: Option<Vec<u8>>,
    /// Exclusive upper bound.
    end: Option<Vec<u8>>,
    /// Set once the end bound has been passed or an error was yielded.
    done: bool,
}

impl TableIterator {
    pub(super) fn new(
        reader: Arc<TableReader>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Self {
        let next_block = match start {
            Some(key) => reader.seek_block(key),
            None => 0,
        };
        Self {
            reader,
            next_block,
            current: Vec::new(),
            pos: 0,
            pending_start: start.map(|s| s.to_vec()),
            end: end.map(|e| e.to_vec()),
            done: false,
        }
    }

    /// Load the next block, applying the pending start bound if present.
    fn load_next_block(&mut self) -> Result<bool> {
        if self.next_block >= self.reader.block_count() {
            return Ok(false);
        }

        let block = self.reader.read_block(self.next_block)?;
        self.next_block += 1;

        self.current.clear();
        for entry in block.iter() {
            self.current.push(entry?);
        }
        self.pos = 0;

        if let Some(start) = self.pending_start.take() {
            while self.pos < self.current.len() && self.current[self.pos].0 < start {
                self.pos += 1;
            }
        }
        Ok(true)
    }
}

impl Iterator for TableIterator {
    type Item = Result<BlockEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.pos < self.current.len() {
                let entry = self.current[self.pos].clone();
                self.pos += 1;

                if let Some(end) = &self.end {
                    if entry.0.as_slice() >= end.as_slice() {
                        self.done = true;
                        return None;
                    }
                }
                return Some(Ok(entry));
            }

            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
