//! Data block encoder/decoder.
//!
//! A block holds a sorted run of entries with keys prefix-compressed against
//! the previous key. Every 16th entry is a restart point (prefix length 0),
//! and the offsets of all restart points sit at the end of the payload so a
//! lookup can binary search restarts and scan forward from the nearest one.
//!
//! ## Payload layout (before compression)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Entry: [shared: u16][unshared: u16][kind: u8][seq: u64]      │
//! │        [value_len: u32][key delta][value]                    │
//! │ ... repeated ...                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Restart offsets: [off: u32] × n                              │
//! │ Restart count: u32                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trailer (always uncompressed)
//! ```text
//! [flag: u8 (0 = raw, 1 = lz4)][crc32: u32]
//! ```
//! The CRC covers the stored payload and the flag. A mismatch fails the read
//! of this block with `Corruption` and nothing else.

use bytes::BufMut;

use crate::error::{Result, StrataError};

/// New restart point every this many entries.
const RESTART_INTERVAL: usize = 16;

/// Entry header: shared (2) + unshared (2) + kind (1) + seq (8) + value_len (4).
const ENTRY_HEADER_SIZE: usize = 17;

/// Trailer: compression flag (1) + crc32 (4).
const TRAILER_SIZE: usize = 5;

const KIND_PUT: u8 = 0x01;
const KIND_TOMBSTONE: u8 = 0x02;

const FLAG_RAW: u8 = 0;
const FLAG_LZ4: u8 = 1;

/// One decoded entry: (user key, sequence number, value or tombstone).
pub type BlockEntry = (Vec<u8>, u64, Option<Vec<u8>>);

// =============================================================================
// Builder
// =============================================================================

/// Accumulates sorted entries and serializes them into one block.
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    entries_since_restart: usize,
    last_key: Vec<u8>,
    target_size: usize,
    entry_count: usize,
}

impl BlockBuilder {
    /// Create a builder targeting `target_size` bytes of payload.
    pub fn new(target_size: usize) -> Self {
        Self {
            data: Vec::with_capacity(target_size),
            restarts: Vec::new(),
            entries_since_restart: 0,
            last_key: Vec::new(),
            target_size,
            entry_count: 0,
        }
    }

    /// Add an entry. MUST be called in sorted key order.
    ///
    /// Returns false if the block is full; the first entry is always
    /// accepted so a block is never empty.
    pub fn add(&mut self, key: &[u8], seq: u64, value: Option<&[u8]>) -> bool {
        let value_len = value.map_or(0, |v| v.len());
        let worst_case = ENTRY_HEADER_SIZE + key.len() + value_len;

        if self.entry_count > 0 && self.estimated_size() + worst_case > self.target_size {
            return false;
        }

        let shared = if self.entries_since_restart == RESTART_INTERVAL || self.entry_count == 0 {
            self.restarts.push(self.data.len() as u32);
            self.entries_since_restart = 0;
            0
        } else {
            shared_prefix_len(&self.last_key, key).min(u16::MAX as usize)
        };
        let unshared = key.len() - shared;

        self.data.put_u16_le(shared as u16);
        self.data.put_u16_le(unshared as u16);
        match value {
            Some(v) => {
                self.data.put_u8(KIND_PUT);
                self.data.put_u64_le(seq);
                self.data.put_u32_le(v.len() as u32);
                self.data.put_slice(&key[shared..]);
                self.data.put_slice(v);
            }
            None => {
                self.data.put_u8(KIND_TOMBSTONE);
                self.data.put_u64_le(seq);
                self.data.put_u32_le(0);
                self.data.put_slice(&key[shared..]);
            }
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entries_since_restart += 1;
        self.entry_count += 1;
        true
    }

    /// Current estimated payload size (entries + restart array).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Finalize: append the restart array, optionally compress, add trailer.
    pub fn build(mut self, compress: bool) -> Vec<u8> {
        for offset in &self.restarts {
            self.data.put_u32_le(*offset);
        }
        self.data.put_u32_le(self.restarts.len() as u32);

        let (mut block, flag) = if compress {
            let compressed = lz4_flex::compress_prepend_size(&self.data);
            // Keep the raw payload when compression does not pay for itself.
            if compressed.len() < self.data.len() {
                (compressed, FLAG_LZ4)
            } else {
                (self.data, FLAG_RAW)
            }
        } else {
            (self.data, FLAG_RAW)
        };

        block.put_u8(flag);
        let crc = crc32fast::hash(&block);
        block.put_u32_le(crc);
        block
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

// =============================================================================
// Decoded block
// =============================================================================

/// A verified, decompressed block ready for lookups and iteration.
pub struct Block {
    /// Decompressed payload: entries followed by the restart array.
    data: Vec<u8>,
    /// Byte offsets of restart entries within `data`.
    restarts: Vec<u32>,
    /// Offset where entries end and the restart array begins.
    entries_end: usize,
}

impl Block {
    /// Decode a block read from disk. Verifies the checksum first; a mismatch
    /// is a `Corruption` error confined to this block.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < TRAILER_SIZE {
            return Err(StrataError::Corruption("block too short".into()));
        }

        let crc_start = raw.len() - 4;
        let stored_crc = u32::from_le_bytes(raw[crc_start..].try_into().unwrap());
        let computed_crc = crc32fast::hash(&raw[..crc_start]);
        if stored_crc != computed_crc {
            return Err(StrataError::Corruption(format!(
                "block CRC mismatch: stored {:#x}, computed {:#x}",
                stored_crc, computed_crc
            )));
        }

        let flag = raw[crc_start - 1];
        let payload = &raw[..crc_start - 1];
        let data = match flag {
            FLAG_RAW => payload.to_vec(),
            FLAG_LZ4 => lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| StrataError::Corruption(format!("lz4 decompress failed: {}", e)))?,
            other => {
                return Err(StrataError::Corruption(format!(
                    "unknown block compression flag: {}",
                    other
                )))
            }
        };

        if data.len() < 4 {
            return Err(StrataError::Corruption("block payload too short".into()));
        }
        let restart_count =
            u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as usize;
        let restart_array_len = restart_count
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| StrataError::Corruption("restart count overflow".into()))?;
        if restart_array_len > data.len() {
            return Err(StrataError::Corruption("restart array out of bounds".into()));
        }

        let entries_end = data.len() - restart_array_len;
        let mut restarts = Vec::with_capacity(restart_count);
        for i in 0..restart_count {
            let at = entries_end + i * 4;
            let off = u32::from_le_bytes(data[at..at + 4].try_into().unwrap());
            if off as usize >= entries_end && entries_end != 0 {
                return Err(StrataError::Corruption("restart offset out of bounds".into()));
            }
            restarts.push(off);
        }

        Ok(Self {
            data,
            restarts,
            entries_end,
        })
    }

    /// Point lookup within this block.
    pub fn get(&self, key: &[u8]) -> Result<Option<(u64, Option<Vec<u8>>)>> {
        let mut iter = self.iter();
        iter.seek(key)?;
        match iter.next() {
            Some(Ok((found, seq, value))) if found == key => Ok(Some((seq, value))),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    /// Iterate entries in key order from the start of the block.
    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator {
            block: self,
            pos: 0,
            prev_key: Vec::new(),
        }
    }

    /// Full key of the entry at a restart offset (shared is 0 there).
    fn restart_key(&self, restart_idx: usize) -> Result<&[u8]> {
        let pos = self.restarts[restart_idx] as usize;
        let (header, key_start) = self.parse_header(pos)?;
        Ok(&self.data[key_start..key_start + header.unshared])
    }

    fn parse_header(&self, pos: usize) -> Result<(EntryHeader, usize)> {
        if pos + ENTRY_HEADER_SIZE > self.entries_end {
            return Err(StrataError::Corruption("entry header out of bounds".into()));
        }
        let d = &self.data[pos..];
        let shared = u16::from_le_bytes(d[0..2].try_into().unwrap()) as usize;
        let unshared = u16::from_le_bytes(d[2..4].try_into().unwrap()) as usize;
        let kind = d[4];
        let seq = u64::from_le_bytes(d[5..13].try_into().unwrap());
        let value_len = u32::from_le_bytes(d[13..17].try_into().unwrap()) as usize;

        if kind != KIND_PUT && kind != KIND_TOMBSTONE {
            return Err(StrataError::Corruption(format!("bad entry kind: {}", kind)));
        }
        let key_start = pos + ENTRY_HEADER_SIZE;
        if key_start + unshared + value_len > self.entries_end {
            return Err(StrataError::Corruption("entry body out of bounds".into()));
        }

        Ok((
            EntryHeader {
                shared,
                unshared,
                kind,
                seq,
                value_len,
            },
            key_start,
        ))
    }
}

struct EntryHeader {
    shared: usize,
    unshared: usize,
    kind: u8,
    seq: u64,
    value_len: usize,
}

// =============================================================================
// Iterator
// =============================================================================

/// Streams entries of one block in key order.
pub struct BlockIterator<'a> {
    block: &'a Block,
    pos: usize,
    /// Previous full key, needed to expand shared prefixes.
    prev_key: Vec<u8>,
}

impl<'a> BlockIterator<'a> {
    /// Position the iterator at the first entry with key >= `target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        // Binary search restarts: find the last restart whose key <= target,
        // then scan forward from there.
        let mut lo = 0usize;
        let mut hi = self.block.restarts.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.block.restart_key(mid)? <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let restart = lo.saturating_sub(1);

        self.pos = self.block.restarts.get(restart).copied().unwrap_or(0) as usize;
        self.prev_key.clear();

        // Scan forward until the next entry is >= target.
        loop {
            let probe = self.pos;
            let saved_prev = self.prev_key.clone();
            match self.next() {
                Some(Ok((key, _, _))) => {
                    if key.as_slice() >= target {
                        // Step back: re-yield this entry on the next call.
                        self.pos = probe;
                        self.prev_key = saved_prev;
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }
}

impl<'a> Iterator for BlockIterator<'a> {
    type Item = Result<BlockEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.block.entries_end {
            return None;
        }

        let (header, key_start) = match self.block.parse_header(self.pos) {
            Ok(parsed) => parsed,
            Err(e) => return Some(Err(e)),
        };
        if header.shared > self.prev_key.len() {
            return Some(Err(StrataError::Corruption(
                "shared prefix longer than previous key".into(),
            )));
        }

        let mut key = Vec::with_capacity(header.shared + header.unshared);
        key.extend_from_slice(&self.prev_key[..header.shared]);
        key.extend_from_slice(&self.block.data[key_start..key_start + header.unshared]);

        let value_start = key_start + header.unshared;
        let value = match header.kind {
            KIND_PUT => Some(self.block.data[value_start..value_start + header.value_len].to_vec()),
            _ => None,
        };

        self.pos = value_start + header.value_len;
        self.prev_key = key.clone();

        Some(Ok((key, header.seq, value)))
    }
}
