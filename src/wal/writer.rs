//! WAL Writer
//!
//! Appends framed records to the active WAL file.
//!
//! Two layers of buffering:
//!   BufWriter.flush()  → Rust buffer → OS page cache
//!   file.sync_all()    → OS page cache → physical disk
//!
//! A successful `append` means the record is durable to the extent the
//! configured sync strategy promises. Callers must treat an error as the
//! mutation not having committed.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::WalRecord;

/// Writes records to a single WAL file
pub struct WalWriter {
    writer: BufWriter<File>,
    /// Byte offset where the next record will land.
    offset: u64,
    sync_strategy: WalSyncStrategy,
    records_since_sync: usize,
}

impl WalWriter {
    /// Create a new WAL file (truncating any leftover with the same name).
    pub fn create(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            offset: 0,
            sync_strategy,
            records_since_sync: 0,
        })
    }

    /// Append a record. Returns the file offset the record was written at.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64> {
        let encoded = record.encode()?;
        let record_offset = self.offset;

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.records_since_sync += 1;

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => {
                self.writer.get_ref().sync_all()?;
                self.records_since_sync = 0;
            }
            WalSyncStrategy::EveryNRecords { count } => {
                if self.records_since_sync >= count {
                    self.writer.get_ref().sync_all()?;
                    self.records_since_sync = 0;
                }
            }
        }

        Ok(record_offset)
    }

    /// Force fsync to disk. Ensures all buffered records are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.records_since_sync = 0;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
