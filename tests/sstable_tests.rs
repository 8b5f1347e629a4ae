//! Sorted table integration tests: build, reopen, point reads, scans.

use std::sync::Arc;

use tempfile::TempDir;

use stratakv::storage::{table_path, TableBuilder, TableReader};

fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("value{:05}", i).into_bytes()
}

/// Build a table with `count` sequential entries and reopen it from disk.
fn build_and_open(dir: &TempDir, count: usize, compress: bool) -> Arc<TableReader> {
    let path = table_path(dir.path(), 1);
    let mut builder = TableBuilder::new(&path, 1, 512, compress, 10).unwrap();
    for i in 0..count {
        builder.add(&key(i), i as u64 + 1, Some(&value(i))).unwrap();
    }
    let meta = builder.finish().unwrap();
    assert_eq!(meta.entry_count, count as u64);

    Arc::new(TableReader::open(&path, meta).unwrap())
}

// =============================================================================
// Build and Read
// =============================================================================

#[test]
fn test_sstable_build_and_read() {
    let dir = TempDir::new().unwrap();
    let reader = build_and_open(&dir, 1000, false);

    // Every key readable, spanning many blocks at 512-byte block size.
    for i in (0..1000).step_by(7) {
        let (seq, val) = reader.get(&key(i)).unwrap().unwrap();
        assert_eq!(seq, i as u64 + 1);
        assert_eq!(val.unwrap(), value(i));
    }

    // Absent keys: before, between and after the stored range.
    assert!(reader.get(b"aaa").unwrap().is_none());
    assert!(reader.get(b"key00500x").unwrap().is_none());
    assert!(reader.get(b"zzz").unwrap().is_none());
}

#[test]
fn test_sstable_compressed_roundtrip() {
    let dir = TempDir::new().unwrap();
    let reader = build_and_open(&dir, 500, true);

    for i in (0..500).step_by(13) {
        let (_, val) = reader.get(&key(i)).unwrap().unwrap();
        assert_eq!(val.unwrap(), value(i));
    }
}

#[test]
fn test_sstable_tombstone_read() {
    let dir = TempDir::new().unwrap();
    let path = table_path(dir.path(), 1);
    let mut builder = TableBuilder::new(&path, 1, 4096, false, 10).unwrap();
    builder.add(b"alive", 1, Some(b"value")).unwrap();
    builder.add(b"dead", 2, None).unwrap();
    let meta = builder.finish().unwrap();

    let reader = TableReader::open(&path, meta).unwrap();

    // A tombstone reads as present-but-deleted, not as absent.
    let (seq, val) = reader.get(b"dead").unwrap().unwrap();
    assert_eq!(seq, 2);
    assert!(val.is_none());
    assert!(reader.get(b"alive").unwrap().unwrap().1.is_some());
}

#[test]
fn test_sstable_rejects_oversized_key() {
    let dir = TempDir::new().unwrap();
    let path = table_path(dir.path(), 1);
    let mut builder = TableBuilder::new(&path, 1, 4096, false, 10).unwrap();

    // Key lengths are encoded as u16; a longer key would be silently
    // truncated into a corrupt table if it were accepted.
    let big = vec![b'k'; (u16::MAX as usize) + 1];
    assert!(builder.add(&big, 1, Some(b"v")).is_err());

    let max = vec![b'k'; u16::MAX as usize];
    builder.add(&max, 1, Some(b"v")).unwrap();
    let meta = builder.finish().unwrap();

    let reader = TableReader::open(&path, meta).unwrap();
    assert!(reader.get(&max).unwrap().is_some());
}

#[test]
fn test_sstable_meta_covers_key_range() {
    let dir = TempDir::new().unwrap();
    let reader = build_and_open(&dir, 100, false);

    let meta = reader.meta();
    assert_eq!(meta.min_key, key(0));
    assert_eq!(meta.max_key, key(99));
    assert!(meta.key_in_range(&key(50)));
    assert!(!meta.key_in_range(b"zzz"));
}

// =============================================================================
// Scans
// =============================================================================

#[test]
fn test_sstable_full_scan_is_ordered() {
    let dir = TempDir::new().unwrap();
    let reader = build_and_open(&dir, 1000, true);

    let entries: Vec<_> = reader
        .iter(None, None)
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(entries.len(), 1000);
    for (i, (k, _, _)) in entries.iter().enumerate() {
        assert_eq!(k, &key(i));
    }
}

#[test]
fn test_sstable_bounded_scan() {
    let dir = TempDir::new().unwrap();
    let reader = build_and_open(&dir, 1000, false);

    // End bound is exclusive.
    let entries: Vec<_> = reader
        .iter(Some(&key(100)), Some(&key(110)))
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[0].0, key(100));
    assert_eq!(entries[9].0, key(109));
}

#[test]
fn test_sstable_scan_outside_range_is_empty() {
    let dir = TempDir::new().unwrap();
    let reader = build_and_open(&dir, 10, false);

    let entries: Vec<_> = reader.iter(Some(b"zzz"), None).collect();
    assert!(entries.is_empty());
}
