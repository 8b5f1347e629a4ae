//! Version Set Module
//!
//! Tracks which table files are live.
//!
//! ## Responsibilities
//! - Immutable `Version` snapshots: the set of live tables per level
//! - Durable commits of version deltas through the manifest
//! - Startup recovery: rebuild the last committed version
//! - Table file lifetime: a file is unlinked only when the last version
//!   referencing it is gone
//!
//! A new `Version` is derived from the previous one plus a `VersionEdit`;
//! nothing is ever edited in place. Readers pin a version with an `Arc` for
//! as long as their snapshot must stay consistent, so flushes and
//! compactions never disturb an in-progress read.

pub mod manifest;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Result, StrataError};
use crate::iterator::EntrySource;
use crate::storage::{table_path, TableMeta, TableReader};

pub use manifest::{Manifest, VersionEdit};

// =============================================================================
// Table Handle
// =============================================================================

/// A live table file: an open reader plus deletion bookkeeping.
///
/// Handles are shared by every version that references the table. Once a
/// commit drops the table from the live set the handle is marked obsolete,
/// and the file is unlinked when the last pinned version releases it.
pub struct TableHandle {
    reader: Arc<TableReader>,
    obsolete: AtomicBool,
}

impl TableHandle {
    /// Open the numbered table file described by `meta`.
    pub fn open(dir: &Path, meta: TableMeta) -> Result<Arc<Self>> {
        let path = table_path(dir, meta.id);
        let reader = TableReader::open(&path, meta)?;
        Ok(Arc::new(Self {
            reader: Arc::new(reader),
            obsolete: AtomicBool::new(false),
        }))
    }

    pub fn reader(&self) -> &Arc<TableReader> {
        &self.reader
    }

    pub fn meta(&self) -> &TableMeta {
        self.reader.meta()
    }

    /// Mark the underlying file for deletion once unreferenced.
    fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            let path = self.reader.path().to_path_buf();
            if let Err(e) = fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "failed to unlink obsolete table");
            } else {
                debug!(path = %path.display(), "unlinked obsolete table");
            }
        }
    }
}

// =============================================================================
// Version
// =============================================================================

/// An immutable snapshot of the live table set.
pub struct Version {
    /// `levels[0]` holds L0 newest-first (tables may overlap); deeper levels
    /// are sorted by min_key with non-overlapping key ranges.
    levels: Vec<Vec<Arc<TableHandle>>>,
}

impl Version {
    fn empty(max_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); max_levels],
        }
    }

    /// Look up a key across all levels, newest data first.
    ///
    /// L0 tables can overlap, so every candidate is consulted and the entry
    /// with the highest sequence number wins. Deeper levels hold at most one
    /// candidate table each; the first level with a hit is authoritative.
    pub fn get(&self, key: &[u8]) -> Result<Option<(u64, Option<Vec<u8>>)>> {
        let mut best: Option<(u64, Option<Vec<u8>>)> = None;
        for handle in &self.levels[0] {
            if !handle.meta().key_in_range(key) {
                continue;
            }
            if let Some((seq, value)) = handle.reader().get(key)? {
                if best.as_ref().map_or(true, |(s, _)| seq > *s) {
                    best = Some((seq, value));
                }
            }
        }
        if best.is_some() {
            return Ok(best);
        }

        for level in &self.levels[1..] {
            let idx = level.partition_point(|h| h.meta().max_key.as_slice() < key);
            if let Some(handle) = level.get(idx) {
                if handle.meta().key_in_range(key) {
                    if let Some(found) = handle.reader().get(key)? {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Entry sources covering `[start, end)` for a merged scan.
    ///
    /// Each L0 table is its own source; each deeper level contributes one
    /// source chaining its overlapping tables in key order, which preserves
    /// the one-entry-per-key-per-source contract of the merge.
    pub fn range_sources(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<EntrySource> {
        let mut sources: Vec<EntrySource> = Vec::new();

        for handle in &self.levels[0] {
            if handle.meta().overlaps(start, end) {
                sources.push(Box::new(handle.reader().iter(start, end)));
            }
        }

        for level in &self.levels[1..] {
            let iters: Vec<_> = level
                .iter()
                .filter(|h| h.meta().overlaps(start, end))
                .map(|h| h.reader().iter(start, end))
                .collect();
            if !iters.is_empty() {
                sources.push(Box::new(iters.into_iter().flatten()));
            }
        }
        sources
    }

    /// Tables of one level.
    pub fn level(&self, level: usize) -> &[Arc<TableHandle>] {
        &self.levels[level]
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Total file size of one level in bytes.
    pub fn level_size(&self, level: usize) -> u64 {
        self.levels[level].iter().map(|h| h.meta().file_size).sum()
    }

    pub fn table_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }
}

// =============================================================================
// Version Set
// =============================================================================

/// Owns the current version, the manifest, and the file-number/sequence
/// counters.
pub struct VersionSet {
    dir: PathBuf,
    max_levels: usize,
    current: RwLock<Arc<Version>>,
    /// Serializes commits; held across append + pointer swap.
    manifest: Mutex<Manifest>,
    next_file_number: AtomicU64,
    last_sequence: AtomicU64,
    /// Lowest WAL number whose records are not yet captured in a table.
    log_number: AtomicU64,
}

impl VersionSet {
    /// Recover (or initialize) the version set in `dir`.
    ///
    /// Replays the manifest named by `CURRENT`, opens every live table, then
    /// starts a fresh manifest seeded with a full snapshot so old manifests
    /// never grow without bound.
    pub fn open(dir: &Path, max_levels: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        // Accumulated state from replay.
        let mut live: Vec<BTreeMap<u64, TableMeta>> = vec![BTreeMap::new(); max_levels];
        let mut next_file_number = 1u64;
        let mut last_sequence = 0u64;
        let mut log_number = 0u64;

        if let Some(manifest_file) = manifest::read_current(dir)? {
            let edits = Manifest::replay(&manifest_file)?;
            for edit in edits {
                for (level, id) in &edit.deleted {
                    let level = *level as usize;
                    if level < max_levels {
                        live[level].remove(id);
                    }
                }
                for (level, meta) in edit.added {
                    let level = level as usize;
                    if level >= max_levels {
                        return Err(StrataError::Manifest(format!(
                            "manifest references level {} beyond max_levels {}",
                            level, max_levels
                        )));
                    }
                    live[level].insert(meta.id, meta);
                }
                if let Some(n) = edit.next_file_number {
                    next_file_number = next_file_number.max(n);
                }
                if let Some(s) = edit.last_sequence {
                    last_sequence = last_sequence.max(s);
                }
                if let Some(l) = edit.log_number {
                    log_number = log_number.max(l);
                }
            }
        }

        // Open every live table.
        let mut version = Version::empty(max_levels);
        for (level, metas) in live.iter().enumerate() {
            for meta in metas.values() {
                version.levels[level].push(TableHandle::open(dir, meta.clone())?);
            }
            if level == 0 {
                // L0 is searched newest-first; ids grow over time.
                version.levels[0].sort_by(|a, b| b.meta().id.cmp(&a.meta().id));
            } else {
                version.levels[level].sort_by(|a, b| a.meta().min_key.cmp(&b.meta().min_key));
            }
        }

        info!(
            tables = version.table_count(),
            last_sequence, log_number, "version set recovered"
        );

        // Start a fresh manifest with a snapshot of the recovered state.
        let manifest_number = next_file_number;
        next_file_number += 1;
        let mut manifest = Manifest::create(dir, manifest_number)?;
        let snapshot = VersionEdit {
            log_number: Some(log_number),
            next_file_number: Some(next_file_number),
            last_sequence: Some(last_sequence),
            added: version
                .levels
                .iter()
                .enumerate()
                .flat_map(|(level, tables)| {
                    tables
                        .iter()
                        .map(move |h| (level as u32, h.meta().clone()))
                })
                .collect(),
            deleted: Vec::new(),
        };
        manifest.append(&snapshot)?;
        manifest::set_current(dir, manifest_number)?;

        // Earlier manifests are fully superseded by the snapshot.
        let current_name = format!("MANIFEST-{:06}", manifest_number);
        for entry in fs::read_dir(dir)?.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("MANIFEST-") && name != current_name {
                if let Err(e) = fs::remove_file(entry.path()) {
                    debug!(file = %name, error = %e, "failed to delete old manifest");
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            max_levels,
            current: RwLock::new(Arc::new(version)),
            manifest: Mutex::new(manifest),
            next_file_number: AtomicU64::new(next_file_number),
            last_sequence: AtomicU64::new(last_sequence),
            log_number: AtomicU64::new(log_number),
        })
    }

    /// The current version; cloning the Arc pins it for the caller.
    pub fn current(&self) -> Arc<Version> {
        self.current.read().clone()
    }

    /// Allocate a fresh file number (tables, WALs, manifests share one space).
    pub fn allocate_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocate the next sequence number. Called inside the write critical
    /// section, so allocation order matches WAL append order.
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Raise the recovered sequence floor after WAL replay.
    pub fn bump_sequence_to(&self, seq: u64) {
        self.last_sequence.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn log_number(&self) -> u64 {
        self.log_number.load(Ordering::SeqCst)
    }

    /// Commit an edit: append to the manifest, then publish the new version.
    ///
    /// The commit is the durability point of a flush or compaction. Tables
    /// dropped by the edit are marked obsolete and unlink once unreferenced;
    /// the prior version stays fully usable for readers still pinning it.
    pub fn log_and_apply(&self, mut edit: VersionEdit) -> Result<Arc<Version>> {
        let mut manifest = self.manifest.lock();

        // Record counters so a replay of just this manifest restores them.
        edit.next_file_number = Some(self.next_file_number.load(Ordering::SeqCst));
        edit.last_sequence = Some(self.last_sequence.load(Ordering::SeqCst));

        let base = self.current();

        // Build the successor version.
        let mut levels: Vec<Vec<Arc<TableHandle>>> = base.levels.clone();
        let mut removed: Vec<Arc<TableHandle>> = Vec::new();

        for (level, id) in &edit.deleted {
            let level = *level as usize;
            levels[level].retain(|h| {
                if h.meta().id == *id {
                    removed.push(h.clone());
                    false
                } else {
                    true
                }
            });
        }
        for (level, meta) in &edit.added {
            let level = *level as usize;
            if level >= self.max_levels {
                return Err(StrataError::Manifest(format!(
                    "edit targets level {} beyond max_levels {}",
                    level, self.max_levels
                )));
            }
            let handle = TableHandle::open(&self.dir, meta.clone())?;
            if level == 0 {
                levels[0].insert(0, handle);
            } else {
                let at = levels[level]
                    .partition_point(|h| h.meta().min_key < meta.min_key);
                levels[level].insert(at, handle);
            }
        }

        // Durable first, visible second.
        manifest.append(&edit)?;

        let new_version = Arc::new(Version { levels });
        *self.current.write() = new_version.clone();

        if let Some(l) = edit.log_number {
            self.log_number.store(l, Ordering::SeqCst);
        }
        for handle in removed {
            handle.mark_obsolete();
        }

        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableBuilder;
    use tempfile::TempDir;

    fn build_table(dir: &Path, id: u64) -> TableMeta {
        let mut builder = TableBuilder::new(&table_path(dir, id), id, 4096, false, 10).unwrap();
        builder.add(b"alpha", 1, Some(b"a")).unwrap();
        builder.add(b"omega", 2, Some(b"z")).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn fresh_store_starts_empty() {
        let dir = TempDir::new().unwrap();
        let versions = VersionSet::open(dir.path(), 4).unwrap();

        assert_eq!(versions.current().table_count(), 0);
        assert_eq!(versions.last_sequence(), 0);
        assert!(dir.path().join(manifest::CURRENT_FILE).exists());
    }

    #[test]
    fn committed_tables_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let versions = VersionSet::open(dir.path(), 4).unwrap();
            let id = versions.allocate_file_number();
            let meta = build_table(dir.path(), id);
            versions.bump_sequence_to(2);
            versions
                .log_and_apply(VersionEdit {
                    added: vec![(0, meta)],
                    ..Default::default()
                })
                .unwrap();
        }

        let versions = VersionSet::open(dir.path(), 4).unwrap();
        let version = versions.current();
        assert_eq!(version.level(0).len(), 1);
        assert_eq!(versions.last_sequence(), 2);

        let (seq, value) = version.get(b"alpha").unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(value.as_deref(), Some(b"a".as_slice()));
        assert!(version.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn file_numbers_keep_rising_across_reopens() {
        let dir = TempDir::new().unwrap();
        let first = {
            let versions = VersionSet::open(dir.path(), 4).unwrap();
            versions.allocate_file_number()
        };
        let second = {
            let versions = VersionSet::open(dir.path(), 4).unwrap();
            versions.allocate_file_number()
        };
        assert!(second > first);
    }
}
