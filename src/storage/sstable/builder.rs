//! Table Builder
//!
//! Writes a sorted run of entries to a new table file.
//!
//! Used during:
//! - Memtable flush (sorted memtable → L0 table)
//! - Compaction (merged iterator → new tables in the target level)
//!
//! Build process:
//! 1. Add entries one by one (must be in sorted key order)
//! 2. Entries fill blocks; a full block is written out and indexed
//! 3. `finish()` flushes the last block, writes filter, index, footer, fsync

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};

use super::block::BlockBuilder;
use super::bloom::BloomFilter;
use super::{Footer, IndexEntry, TableMeta, MAX_KEY_LEN};

/// Builder for creating a new table from sorted entries
pub struct TableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Unique file id, recorded in the returned metadata.
    id: u64,
    /// Current block being filled.
    block: BlockBuilder,
    /// One index entry per flushed data block.
    index: Vec<IndexEntry>,
    /// Keys accumulated for the filter block, built at finish.
    filter_keys: Vec<Vec<u8>>,
    /// Current write position in the file.
    offset: u64,
    block_size: usize,
    compress: bool,
    bloom_bits_per_key: usize,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    entry_count: u64,
    /// Last key added to the current block (becomes its index key).
    last_key_in_block: Option<Vec<u8>>,
}

impl TableBuilder {
    /// Create a builder writing to `path`.
    pub fn new(
        path: &Path,
        id: u64,
        block_size: usize,
        compress: bool,
        bloom_bits_per_key: usize,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            id,
            block: BlockBuilder::new(block_size),
            index: Vec::new(),
            filter_keys: Vec::new(),
            offset: 0,
            block_size,
            compress,
            bloom_bits_per_key,
            min_key: None,
            max_key: None,
            entry_count: 0,
            last_key_in_block: None,
        })
    }

    /// Add an entry (`None` value = tombstone). MUST be called in sorted
    /// key order, one entry per key.
    pub fn add(&mut self, key: &[u8], seq: u64, value: Option<&[u8]>) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(StrataError::InvalidArgument(format!(
                "key is {} bytes; the table format caps keys at {} bytes",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key = Some(key.to_vec());
        self.entry_count += 1;
        self.filter_keys.push(key.to_vec());

        if self.block.add(key, seq, value) {
            self.last_key_in_block = Some(key.to_vec());
            return Ok(());
        }

        // Block is full — flush it, then add to a fresh one.
        self.flush_block()?;
        assert!(self.block.add(key, seq, value));
        self.last_key_in_block = Some(key.to_vec());

        Ok(())
    }

    /// Total entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written to disk plus the size of the block in progress.
    /// Used by compaction to decide when to cut over to a new output file.
    pub fn estimated_file_size(&self) -> u64 {
        self.offset + self.block.estimated_size() as u64
    }

    /// Flush the current block and record an index entry for it.
    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }

        let full = std::mem::replace(&mut self.block, BlockBuilder::new(self.block_size));
        let block_data = full.build(self.compress);
        self.writer.write_all(&block_data)?;

        self.index.push(IndexEntry {
            last_key: self.last_key_in_block.take().unwrap_or_default(),
            offset: self.offset,
            len: block_data.len() as u64,
        });
        self.offset += block_data.len() as u64;
        Ok(())
    }

    /// Finalize the table: last block, filter block, index block, footer, fsync.
    pub fn finish(mut self) -> Result<TableMeta> {
        self.flush_block()?;

        // Filter block
        let filter_offset = self.offset;
        let mut filter = BloomFilter::new(self.filter_keys.len(), self.bloom_bits_per_key);
        for key in &self.filter_keys {
            filter.insert(key);
        }
        let filter_data = filter.encode();
        self.writer.write_all(&filter_data)?;
        self.offset += filter_data.len() as u64;

        // Index block
        let index_offset = self.offset;
        let mut index_data = Vec::new();
        for entry in &self.index {
            entry.encode_into(&mut index_data);
        }
        self.writer.write_all(&index_data)?;
        self.offset += index_data.len() as u64;

        // Footer
        let footer = Footer {
            index_offset,
            index_len: index_data.len() as u64,
            filter_offset,
            filter_len: filter_data.len() as u64,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += Footer::SIZE as u64;

        // Durability before the file can be referenced by the manifest.
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(TableMeta {
            id: self.id,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
            entry_count: self.entry_count,
            file_size: self.offset,
        })
    }

    /// Path this builder writes to (for cleanup on aborted builds).
    pub fn path(&self) -> &Path {
        &self.path
    }
}
