//! Sorted Table Module
//!
//! Immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Block 0                                            │
//! │   prefix-compressed entries + restart array             │
//! │   [payload (raw or lz4)][flag: u8][crc32: u32]          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block 1 ...                                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filter Block (bloom over user keys)                     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block                                             │
//! │   [key_len: u16][last_key][offset: u64][len: u64] ...   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (40 bytes)                                       │
//! │   index off/len | filter off/len | magic                │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every entry carries its sequence number, so recency comparisons against
//! the memtable and other tables need no out-of-band state. A table holds at
//! most one entry per user key (memtable flush and compaction both dedup).

mod block;
mod bloom;
mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

pub use block::{Block, BlockBuilder, BlockIterator};
pub use bloom::BloomFilter;
pub use builder::TableBuilder;
pub use iterator::TableIterator;
pub use reader::TableReader;

/// Magic number identifying a StrataKV table file.
pub(crate) const TABLE_MAGIC: u64 = 0x5354_5241_5441_4B56; // "STRATAKV"

/// Longest key a table can hold; the block and index formats store key
/// lengths as `u16`.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Build the path of a numbered table file inside a data directory.
pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", id))
}

// =============================================================================
// Table Metadata
// =============================================================================

/// Metadata about one table file, recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Unique file identifier (also the filename stem).
    pub id: u64,
    /// Smallest user key in the table.
    pub min_key: Vec<u8>,
    /// Largest user key in the table.
    pub max_key: Vec<u8>,
    /// Number of entries (including tombstones).
    pub entry_count: u64,
    /// File size in bytes.
    pub file_size: u64,
}

impl TableMeta {
    /// Quick check whether `key` can possibly live in this table.
    pub fn key_in_range(&self, key: &[u8]) -> bool {
        key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// Whether this table's key range overlaps `[start, end]` (inclusive,
    /// `None` = unbounded).
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let after_start = match start {
            Some(s) => self.max_key.as_slice() >= s,
            None => true,
        };
        let before_end = match end {
            Some(e) => self.min_key.as_slice() <= e,
            None => true,
        };
        after_start && before_end
    }
}

// =============================================================================
// Index Entry
// =============================================================================

/// One index block entry: maps a data block's last key to its location.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    /// Last (largest) key in the block.
    pub last_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Length of the block in bytes (trailer included).
    pub len: u64,
}

impl IndexEntry {
    /// Format: [key_len: u16][key][offset: u64][len: u64]
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.last_key.len() as u16);
        buf.put_slice(&self.last_key);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.len);
    }

    /// Decode one entry from the front of `data`; returns (entry, consumed).
    pub fn decode(mut data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(StrataError::Corruption("index entry too short".into()));
        }
        let key_len = data.get_u16_le() as usize;
        if data.len() < key_len + 16 {
            return Err(StrataError::Corruption("index entry truncated".into()));
        }
        let last_key = data[..key_len].to_vec();
        data.advance(key_len);
        let offset = data.get_u64_le();
        let len = data.get_u64_le();
        Ok((IndexEntry { last_key, offset, len }, 2 + key_len + 16))
    }
}

// =============================================================================
// Footer
// =============================================================================

/// Fixed-size footer at the end of every table file.
#[derive(Debug, Clone)]
pub(crate) struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub filter_offset: u64,
    pub filter_len: u64,
}

impl Footer {
    /// Footer size in bytes (four offsets/lengths + magic).
    pub const SIZE: usize = 8 * 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.index_offset);
        buf.put_u64_le(self.index_len);
        buf.put_u64_le(self.filter_offset);
        buf.put_u64_le(self.filter_len);
        buf.put_u64_le(TABLE_MAGIC);
        buf
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(StrataError::Corruption("footer too short".into()));
        }
        let index_offset = data.get_u64_le();
        let index_len = data.get_u64_le();
        let filter_offset = data.get_u64_le();
        let filter_len = data.get_u64_le();
        let magic = data.get_u64_le();

        if magic != TABLE_MAGIC {
            return Err(StrataError::Corruption(format!(
                "bad table magic: expected {:#x}, got {:#x}",
                TABLE_MAGIC, magic
            )));
        }

        Ok(Footer {
            index_offset,
            index_len,
            filter_offset,
            filter_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            index_offset: 4096,
            index_len: 512,
            filter_offset: 3800,
            filter_len: 296,
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(decoded.index_offset, 4096);
        assert_eq!(decoded.filter_len, 296);
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = Footer {
            index_offset: 0,
            index_len: 0,
            filter_offset: 0,
            filter_len: 0,
        }
        .encode();
        encoded[35] ^= 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn index_entry_roundtrip() {
        let entry = IndexEntry {
            last_key: b"cherry".to_vec(),
            offset: 128,
            len: 4096,
        };
        let mut buf = Vec::new();
        entry.encode_into(&mut buf);
        let (decoded, consumed) = IndexEntry::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.last_key, b"cherry");
        assert_eq!(decoded.offset, 128);
        assert_eq!(decoded.len, 4096);
    }

    #[test]
    fn meta_range_checks() {
        let meta = TableMeta {
            id: 1,
            min_key: b"banana".to_vec(),
            max_key: b"mango".to_vec(),
            entry_count: 2,
            file_size: 100,
        };
        assert!(meta.key_in_range(b"cherry"));
        assert!(!meta.key_in_range(b"apple"));
        assert!(meta.overlaps(Some(b"lemon"), None));
        assert!(meta.overlaps(None, Some(b"coconut")));
        assert!(!meta.overlaps(Some(b"papaya"), None));
    }
}
