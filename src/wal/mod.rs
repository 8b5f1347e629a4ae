//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append log records before any mutation becomes visible
//! - CRC32 checksums for corruption detection
//! - Sequence numbers for total ordering across memtable and tables
//! - Crash recovery: replay complete records, ignore a torn tail
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ CRC (4) │ Len (4) │ bincode payload │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ...                                     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The CRC covers `Len || payload`, so a partial write at the tail is
//! detected as either a short read or a checksum mismatch. Files are
//! numbered (`{n:06}.wal`); a new file is started at every memtable flush
//! and old files are deleted only after the flushed table is committed to
//! the manifest.

mod record;
mod writer;
mod reader;

use std::path::{Path, PathBuf};

pub use record::{Operation, WalRecord};
pub(crate) use record::{decode_frame, encode_frame};
pub use writer::WalWriter;
pub use reader::{WalReader, WalReplay};

/// Build the path of a numbered WAL file inside a data directory.
pub fn wal_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.wal", number))
}

/// Parse the number out of a WAL filename ("000012.wal" → Some(12)).
pub fn parse_wal_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".wal")?;
    stem.parse().ok()
}
