//! Storage Module
//!
//! Persistent storage layer: immutable, block-structured sorted tables.
//!
//! ## Responsibilities
//! - Persist flushed and compacted runs in sorted, checksummed blocks
//! - Point lookups via sparse index + bloom filter
//! - Lazy range scans
//!
//! Table files never change after `finish()`; they are only unlinked once no
//! live version references them.

pub mod sstable;

pub use sstable::{
    table_path, Block, BlockBuilder, BloomFilter, TableBuilder, TableIterator, TableMeta,
    TableReader, MAX_KEY_LEN,
};
