//! Bloom filter for the table filter block.
//!
//! - If any probed bit is 0 → the key is definitely not in the table
//! - If all probed bits are 1 → the key is probably in the table
//!
//! False positives cost one wasted block read; false negatives are forbidden
//! and cannot occur. Uses double hashing over a split 128-bit xxh3 hash, so
//! no family of independent hash functions is needed.

use bytes::{Buf, BufMut};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Result, StrataError};

/// Probabilistic key-membership filter, one per table.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `expected_keys` at `bits_per_key` budget.
    /// 10 bits/key gives roughly a 1% false positive rate.
    pub fn new(expected_keys: usize, bits_per_key: usize) -> Self {
        let num_bits = (expected_keys.max(1) * bits_per_key).max(64);
        let num_bytes = (num_bits + 7) / 8;

        // Optimal hash count: bits_per_key * ln(2)
        let num_hashes = ((bits_per_key as f64) * 0.69).round() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Add a key to the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Check membership. false → definitely absent, true → probably present.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            if self.bits[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Serialize for the filter block: [num_hashes: u32][bit bytes].
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.bits.len());
        buf.put_u32_le(self.num_hashes);
        buf.put_slice(&self.bits);
        buf
    }

    /// Deserialize from a filter block read off disk.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(StrataError::Corruption("filter block too short".into()));
        }
        let num_hashes = data.get_u32_le();
        if num_hashes == 0 || num_hashes > 30 {
            return Err(StrataError::Corruption(format!(
                "implausible filter hash count: {}",
                num_hashes
            )));
        }
        let bits = data.to_vec();
        Ok(Self {
            num_bits: bits.len() * 8,
            bits,
            num_hashes,
        })
    }

    /// Split a 128-bit hash into the two halves used for double hashing.
    fn hash_key(key: &[u8]) -> (u64, u64) {
        let h = xxh3_128(key);
        ((h >> 64) as u64, h as u64)
    }

    /// i-th probe position: h1 + i * h2 (mod num_bits).
    fn bit_position(&self, h1: u64, h2: u64, i: u32) -> usize {
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (combined % self.num_bits as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_found() {
        let mut filter = BloomFilter::new(100, 10);
        for i in 0..100 {
            filter.insert(format!("key{}", i).as_bytes());
        }
        for i in 0..100 {
            assert!(filter.may_contain(format!("key{}", i).as_bytes()));
        }
    }

    #[test]
    fn absent_keys_mostly_rejected() {
        let mut filter = BloomFilter::new(1000, 10);
        for i in 0..1000 {
            filter.insert(format!("present{}", i).as_bytes());
        }

        let false_positives = (0..1000)
            .filter(|i| filter.may_contain(format!("absent{}", i).as_bytes()))
            .count();
        // 10 bits/key targets ~1% FPR; 5% leaves generous slack.
        assert!(false_positives < 50, "too many false positives: {}", false_positives);
    }

    #[test]
    fn encode_decode_preserves_behavior() {
        let mut filter = BloomFilter::new(50, 10);
        for i in 0..50 {
            filter.insert(format!("k{}", i).as_bytes());
        }

        let decoded = BloomFilter::decode(&filter.encode()).unwrap();
        for i in 0..50 {
            assert!(decoded.may_contain(format!("k{}", i).as_bytes()));
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(BloomFilter::decode(&[]).is_err());
        assert!(BloomFilter::decode(&[0, 0, 0, 0, 1]).is_err()); // zero hashes
    }
}
