//! WAL Reader
//!
//! Reads records back for crash recovery.
//!
//! The reader is deliberately forgiving about the end of the file: a crash
//! mid-append leaves a torn record at the tail, which shows up as a short
//! frame or a CRC mismatch. Everything before it is valid and replayed;
//! the tail itself is reported, not treated as a startup failure.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

use super::record::FRAME_HEADER_SIZE;
use super::WalRecord;

/// Reads all records out of one WAL file
pub struct WalReader;

/// Outcome of replaying a single WAL file
#[derive(Debug)]
pub struct WalReplay {
    /// Records recovered, in append order.
    pub records: Vec<WalRecord>,

    /// Bytes of the file that held well-formed records.
    pub valid_bytes: u64,

    /// Whether a torn or corrupt tail was skipped.
    pub truncated: bool,
}

impl WalReader {
    /// Read every complete record from the file at `path`.
    ///
    /// Stops at the first short or corrupt frame. All complete records before
    /// that point are returned; the torn tail is logged and ignored.
    pub fn replay(path: &Path) -> Result<WalReplay> {
        let data = fs::read(path)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        let mut truncated = false;

        while pos < data.len() {
            if data.len() - pos < FRAME_HEADER_SIZE {
                truncated = true;
                break;
            }
            match WalRecord::decode(&data[pos..]) {
                Ok((record, consumed)) => {
                    records.push(record);
                    pos += consumed;
                }
                Err(_) => {
                    truncated = true;
                    break;
                }
            }
        }

        if truncated {
            warn!(
                path = %path.display(),
                valid_bytes = pos,
                dropped_bytes = data.len() - pos,
                "WAL has a torn tail; replaying the valid prefix only"
            );
        }

        Ok(WalReplay {
            records,
            valid_bytes: pos as u64,
            truncated,
        })
    }
}
