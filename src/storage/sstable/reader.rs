//! Table Reader
//!
//! Opens a table file and serves point lookups and range scans.
//!
//! On open:
//! 1. Read footer (last 40 bytes) → locate index and filter blocks
//! 2. Read and parse the index block → sparse in-memory index
//! 3. Read and decode the bloom filter
//! 4. Data blocks are read lazily, one per lookup or scan step

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StrataError};

use super::block::Block;
use super::bloom::BloomFilter;
use super::iterator::TableIterator;
use super::{Footer, IndexEntry, TableMeta};

/// An opened, immutable table file
pub struct TableReader {
    path: PathBuf,
    /// File handle; a Mutex gives interior mutability for seeking while the
    /// reader itself stays shareable across threads.
    file: Mutex<File>,
    /// Sparse index: one entry per data block, sorted by last key.
    index: Vec<IndexEntry>,
    /// Whole-table bloom filter over user keys.
    filter: BloomFilter,
    /// Metadata from the manifest (or the builder, for fresh tables).
    meta: TableMeta,
}

impl TableReader {
    /// Open a table file. `meta` comes from the manifest entry (or from the
    /// builder that just produced the file).
    pub fn open(path: &Path, meta: TableMeta) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(StrataError::Corruption(format!(
                "table {} too short to contain a footer",
                path.display()
            )));
        }

        // Footer first: it locates everything else.
        file.seek(SeekFrom::Start(file_size - Footer::SIZE as u64))?;
        let mut footer_buf = [0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        // Index block
        file.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index_buf = vec![0u8; footer.index_len as usize];
        file.read_exact(&mut index_buf)?;

        let mut index = Vec::new();
        let mut pos = 0usize;
        while pos < index_buf.len() {
            let (entry, consumed) = IndexEntry::decode(&index_buf[pos..])?;
            index.push(entry);
            pos += consumed;
        }

        // Filter block
        file.seek(SeekFrom::Start(footer.filter_offset))?;
        let mut filter_buf = vec![0u8; footer.filter_len as usize];
        file.read_exact(&mut filter_buf)?;
        let filter = BloomFilter::decode(&filter_buf)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            filter,
            meta,
        })
    }

    /// Point lookup.
    ///
    /// Returns the entry's (sequence, value-or-tombstone), or `None` if the
    /// key is not in this table. A tombstone is `Some((seq, None))` — the
    /// caller must treat it as an authoritative delete, not as absence.
    pub fn get(&self, key: &[u8]) -> Result<Option<(u64, Option<Vec<u8>>)>> {
        // Range check, then bloom — both are memory-only rejections.
        if !self.meta.key_in_range(key) {
            return Ok(None);
        }
        if !self.filter.may_contain(key) {
            return Ok(None);
        }

        // Binary search the sparse index: first block whose last_key >= key.
        let block_idx = match self
            .index
            .binary_search_by(|entry| entry.last_key.as_slice().cmp(key))
        {
            Ok(idx) => idx,
            Err(idx) => {
                if idx >= self.index.len() {
                    return Ok(None);
                }
                idx
            }
        };

        let block = self.read_block(block_idx)?;
        block.get(key)
    }

    /// Read and decode one data block by index position.
    pub(super) fn read_block(&self, block_idx: usize) -> Result<Block> {
        let entry = &self.index[block_idx];
        let mut buf = vec![0u8; entry.len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut buf)?;
        }
        Block::decode(&buf)
    }

    /// Number of data blocks in this table.
    pub(super) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// First block that could contain `key` (index position).
    pub(super) fn seek_block(&self, key: &[u8]) -> usize {
        match self
            .index
            .binary_search_by(|entry| entry.last_key.as_slice().cmp(key))
        {
            Ok(idx) => idx,
            Err(idx) => idx,
        }
    }

    /// Lazy ordered scan over `[start, end)`; `None` bounds are unbounded.
    pub fn iter(self: &Arc<Self>, start: Option<&[u8]>, end: Option<&[u8]>) -> TableIterator {
        TableIterator::new(Arc::clone(self), start, end)
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
