//! WAL record definitions and on-disk framing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Size of the frame header: CRC (4) + payload length (4).
pub(crate) const FRAME_HEADER_SIZE: usize = 8;

/// Wrap a payload in the shared log frame: `[crc32][len][payload]`.
/// The CRC covers the length field and the payload. Used by both the WAL
/// and the manifest, so both get the same torn-tail detection.
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&[0u8; 4]); // CRC placeholder
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let crc = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode one frame from the front of `data`, verifying the CRC.
/// Returns the payload slice and the total bytes consumed.
pub(crate) fn decode_frame(data: &[u8]) -> Result<(&[u8], usize)> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(StrataError::Corruption("record frame too short".into()));
    }

    let stored_crc = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;

    let total = FRAME_HEADER_SIZE + len;
    if data.len() < total {
        return Err(StrataError::Corruption("record truncated".into()));
    }

    let computed_crc = crc32fast::hash(&data[4..total]);
    if stored_crc != computed_crc {
        return Err(StrataError::Corruption("record CRC mismatch".into()));
    }

    Ok((&data[FRAME_HEADER_SIZE..total], total))
}

/// A single record in the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Sequence number — monotonically increasing across the whole store.
    pub seq: u64,

    /// The operation to replay.
    pub op: Operation,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key (tombstone)
    Delete { key: Vec<u8> },
}

impl Operation {
    /// The user key this operation applies to.
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } => key,
            Operation::Delete { key } => key,
        }
    }
}

impl WalRecord {
    pub fn put(seq: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        WalRecord {
            seq,
            op: Operation::Put { key, value },
        }
    }

    pub fn delete(seq: u64, key: Vec<u8>) -> Self {
        WalRecord {
            seq,
            op: Operation::Delete { key },
        }
    }

    /// Serialize this record into a framed byte buffer: `[crc][len][payload]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        Ok(encode_frame(&payload))
    }

    /// Decode one framed record from the front of `data`.
    /// Returns the record and the number of bytes consumed.
    ///
    /// A short buffer or CRC mismatch returns `Corruption`; the caller decides
    /// whether that is a torn tail (stop replay) or a hard failure.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_frame(data)?;
        let record: WalRecord = bincode::deserialize(payload)?;
        Ok((record, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let record = WalRecord::put(7, b"key".to_vec(), b"value".to_vec());
        let encoded = record.encode().unwrap();
        let (decoded, consumed) = WalRecord::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn delete_record_roundtrip() {
        let record = WalRecord::delete(42, b"gone".to_vec());
        let encoded = record.encode().unwrap();
        let (decoded, _) = WalRecord::decode(&encoded).unwrap();
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.op, Operation::Delete { key: b"gone".to_vec() });
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let record = WalRecord::put(1, b"k".to_vec(), b"v".to_vec());
        let mut encoded = record.encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(WalRecord::decode(&encoded).is_err());
    }

    #[test]
    fn truncated_frame_is_corruption() {
        let record = WalRecord::put(1, b"k".to_vec(), b"v".to_vec());
        let encoded = record.encode().unwrap();
        assert!(WalRecord::decode(&encoded[..encoded.len() - 2]).is_err());
        assert!(WalRecord::decode(&encoded[..4]).is_err());
    }
}
