//! Compaction Module
//!
//! Leveled compaction: keeps read amplification bounded by merging tables
//! downward through the level hierarchy.
//!
//! ## Triggers
//! - L0 reaches `l0_compaction_trigger` tables (count, not size — L0 tables
//!   overlap, so each one is a separate read probe)
//! - A deeper level exceeds its size target
//!   (`level_base_size * multiplier^(level-1)`)
//!
//! ## One compaction
//! 1. Pick input tables in the source level and every overlapping table in
//!    the next level
//! 2. Merge-sort all inputs, newest version of each key wins
//! 3. Write merged entries to new tables in the target level, splitting at
//!    `target_table_size`
//! 4. Commit one version edit that adds the outputs and drops the inputs
//!
//! Tombstones are rewritten into the output unless no level below the target
//! holds any overlapping data, at which point the deleted key cannot shadow
//! anything older and the tombstone is dropped for good.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::iterator::{EntrySource, MergeIterator};
use crate::storage::{table_path, TableBuilder, TableMeta};
use crate::version::{TableHandle, Version, VersionEdit, VersionSet};

// =============================================================================
// Task
// =============================================================================

/// A picked compaction: inputs from two adjacent levels, outputs into the
/// deeper one.
pub struct CompactionTask {
    /// Source level.
    pub level: usize,

    /// Target level (`level + 1`).
    pub target: usize,

    /// Input tables from the source level.
    pub inputs: Vec<Arc<TableHandle>>,

    /// Overlapping tables already in the target level.
    pub target_inputs: Vec<Arc<TableHandle>>,

    /// True when nothing below the target level overlaps the inputs, so
    /// tombstones can be discarded instead of rewritten.
    pub drop_tombstones: bool,
}

impl CompactionTask {
    fn input_bytes(&self) -> u64 {
        self.inputs
            .iter()
            .chain(&self.target_inputs)
            .map(|h| h.meta().file_size)
            .sum()
    }
}

// =============================================================================
// Compactor
// =============================================================================

/// Picks and executes compactions against a version set.
pub struct Compactor {
    dir: PathBuf,
    config: Config,
    versions: Arc<VersionSet>,
    /// Serializes whole compactions: two pickers running against the same
    /// version would select (and try to delete) the same tables.
    lock: Mutex<()>,
}

impl Compactor {
    pub fn new(config: Config, versions: Arc<VersionSet>) -> Self {
        Self {
            dir: config.data_dir.clone(),
            config,
            versions,
            lock: Mutex::new(()),
        }
    }

    /// Size target for a level (levels >= 1; L0 is count-triggered).
    fn level_target_size(&self, level: usize) -> u64 {
        let mut target = self.config.level_base_size;
        for _ in 1..level {
            target = target.saturating_mul(self.config.level_size_multiplier);
        }
        target
    }

    /// Pick the most urgent compaction, if any level is over its trigger.
    ///
    /// L0 is checked first: an overfull L0 hurts every read. Deeper levels
    /// are checked shallow to deep; the bottom level is never a source.
    pub fn pick(&self, version: &Version) -> Option<CompactionTask> {
        if version.level(0).len() >= self.config.l0_compaction_trigger {
            // All of L0 compacts at once; the tables overlap each other, so
            // a partial pick would leave stale versions above fresh ones.
            let inputs: Vec<_> = version.level(0).to_vec();
            return Some(self.build_task(version, 0, inputs));
        }

        for level in 1..version.level_count() - 1 {
            if version.level(level).is_empty() {
                continue;
            }
            if version.level_size(level) > self.level_target_size(level) {
                // One table at a time keeps the write burst bounded. The
                // oldest table (lowest id) has waited longest.
                let victim = version
                    .level(level)
                    .iter()
                    .min_by_key(|h| h.meta().id)
                    .cloned()?;
                return Some(self.build_task(version, level, vec![victim]));
            }
        }
        None
    }

    fn build_task(
        &self,
        version: &Version,
        level: usize,
        inputs: Vec<Arc<TableHandle>>,
    ) -> CompactionTask {
        let target = level + 1;

        // Combined key range of the inputs.
        let min_key = inputs
            .iter()
            .map(|h| h.meta().min_key.as_slice())
            .min()
            .unwrap_or(&[])
            .to_vec();
        let max_key = inputs
            .iter()
            .map(|h| h.meta().max_key.as_slice())
            .max()
            .unwrap_or(&[])
            .to_vec();

        let target_inputs: Vec<_> = version
            .level(target)
            .iter()
            .filter(|h| h.meta().overlaps(Some(&min_key), Some(&max_key)))
            .cloned()
            .collect();

        // The merge rewrites the target-level inputs too, and their range
        // can extend past the source inputs. The tombstone check covers the
        // combined span: a tombstone anywhere in the rewrite may shadow
        // deeper data.
        let mut span_min = min_key;
        let mut span_max = max_key;
        for handle in &target_inputs {
            let meta = handle.meta();
            if meta.min_key < span_min {
                span_min = meta.min_key.clone();
            }
            if meta.max_key > span_max {
                span_max = meta.max_key.clone();
            }
        }

        // Tombstones survive unless no level below the target overlaps.
        let drop_tombstones = (target + 1..version.level_count()).all(|deeper| {
            version
                .level(deeper)
                .iter()
                .all(|h| !h.meta().overlaps(Some(&span_min), Some(&span_max)))
        });

        CompactionTask {
            level,
            target,
            inputs,
            target_inputs,
            drop_tombstones,
        }
    }

    /// Execute one compaction and commit it.
    ///
    /// On any failure the partially written output files are deleted; the
    /// version is only changed by the final commit, so an aborted compaction
    /// leaves the store exactly as it was.
    pub fn run(&self, task: CompactionTask) -> Result<()> {
        debug!(
            level = task.level,
            target = task.target,
            inputs = task.inputs.len(),
            target_inputs = task.target_inputs.len(),
            input_bytes = task.input_bytes(),
            drop_tombstones = task.drop_tombstones,
            "compaction started"
        );

        let mut sources: Vec<EntrySource> = Vec::new();
        if task.level == 0 {
            // L0 tables overlap: each is its own merge source so sequence
            // numbers decide the winner.
            for handle in &task.inputs {
                sources.push(Box::new(handle.reader().iter(None, None)));
            }
        } else {
            let mut inputs = task.inputs.clone();
            inputs.sort_by(|a, b| a.meta().min_key.cmp(&b.meta().min_key));
            let iters: Vec<_> = inputs.iter().map(|h| h.reader().iter(None, None)).collect();
            sources.push(Box::new(iters.into_iter().flatten()));
        }
        {
            let mut next = task.target_inputs.clone();
            next.sort_by(|a, b| a.meta().min_key.cmp(&b.meta().min_key));
            if !next.is_empty() {
                let iters: Vec<_> = next.iter().map(|h| h.reader().iter(None, None)).collect();
                sources.push(Box::new(iters.into_iter().flatten()));
            }
        }

        match self.write_outputs(sources, task.drop_tombstones) {
            Ok(outputs) => {
                let output_count = outputs.len();
                let output_bytes: u64 = outputs.iter().map(|m| m.file_size).sum();

                let edit = VersionEdit {
                    added: outputs
                        .into_iter()
                        .map(|meta| (task.target as u32, meta))
                        .collect(),
                    deleted: task
                        .inputs
                        .iter()
                        .map(|h| (task.level as u32, h.meta().id))
                        .chain(
                            task.target_inputs
                                .iter()
                                .map(|h| (task.target as u32, h.meta().id)),
                        )
                        .collect(),
                    ..Default::default()
                };
                self.versions.log_and_apply(edit)?;

                info!(
                    level = task.level,
                    target = task.target,
                    outputs = output_count,
                    output_bytes,
                    "compaction finished"
                );
                Ok(())
            }
            Err(e) => {
                warn!(level = task.level, error = %e, "compaction aborted");
                Err(e)
            }
        }
    }

    /// Merge the sources into new tables in the target level, splitting at
    /// `target_table_size`. Partial outputs are removed on failure.
    fn write_outputs(
        &self,
        sources: Vec<EntrySource>,
        drop_tombstones: bool,
    ) -> Result<Vec<TableMeta>> {
        let mut outputs: Vec<TableMeta> = Vec::new();
        let mut builder: Option<TableBuilder> = None;
        let mut paths: Vec<PathBuf> = Vec::new();

        let result = (|| -> Result<()> {
            let merge = MergeIterator::new(sources)?;
            for entry in merge {
                let (key, seq, value) = entry?;
                if value.is_none() && drop_tombstones {
                    continue;
                }

                let cut_over = builder
                    .as_ref()
                    .map_or(true, |b| b.estimated_file_size() >= self.config.target_table_size);
                if cut_over {
                    if let Some(full) = builder.take() {
                        outputs.push(full.finish()?);
                    }
                    let id = self.versions.allocate_file_number();
                    let path = table_path(&self.dir, id);
                    paths.push(path.clone());
                    builder = Some(TableBuilder::new(
                        &path,
                        id,
                        self.config.block_size,
                        self.config.block_compression,
                        self.config.bloom_bits_per_key,
                    )?);
                }
                if let Some(b) = builder.as_mut() {
                    b.add(&key, seq, value.as_deref())?;
                }
            }
            if let Some(last) = builder.take() {
                if last.entry_count() > 0 {
                    outputs.push(last.finish()?);
                } else {
                    fs::remove_file(last.path())?;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(outputs),
            Err(e) => {
                for path in paths {
                    let _ = fs::remove_file(&path);
                }
                Err(e)
            }
        }
    }

    /// Run compactions until no level is over its trigger.
    pub fn maybe_compact(&self) -> Result<()> {
        let _guard = self.lock.lock();
        while let Some(task) = self.pick(&self.versions.current()) {
            self.run(task)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_table(
        dir: &std::path::Path,
        id: u64,
        entries: &[(&[u8], u64, Option<&[u8]>)],
    ) -> TableMeta {
        let mut builder = TableBuilder::new(&table_path(dir, id), id, 4096, false, 10).unwrap();
        for (key, seq, value) in entries {
            builder.add(key, *seq, *value).unwrap();
        }
        builder.finish().unwrap()
    }

    fn setup(dir: &std::path::Path) -> (Config, Arc<VersionSet>) {
        let config = Config::builder()
            .data_dir(dir)
            .l0_compaction_trigger(2)
            .max_levels(4)
            .build();
        let versions = Arc::new(VersionSet::open(dir, config.max_levels).unwrap());
        (config, versions)
    }

    #[test]
    fn l0_compaction_merges_and_dedups() {
        let tmp = TempDir::new().unwrap();
        let (config, versions) = setup(tmp.path());

        // Two overlapping L0 tables; "b" appears in both.
        let old = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"a", 1, Some(b"1")), (b"b", 2, Some(b"old"))],
        );
        let new = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"b", 5, Some(b"new")), (b"c", 6, Some(b"3"))],
        );
        versions
            .log_and_apply(VersionEdit {
                added: vec![(0, old), (0, new)],
                ..Default::default()
            })
            .unwrap();

        let compactor = Compactor::new(config, versions.clone());
        compactor.maybe_compact().unwrap();

        let version = versions.current();
        assert_eq!(version.level(0).len(), 0);
        assert_eq!(version.level(1).len(), 1);

        let (seq, value) = version.get(b"b").unwrap().unwrap();
        assert_eq!(seq, 5);
        assert_eq!(value.as_deref(), Some(b"new".as_slice()));
        assert!(version.get(b"a").unwrap().is_some());
        assert!(version.get(b"c").unwrap().is_some());
    }

    #[test]
    fn tombstones_dropped_at_bottom() {
        let tmp = TempDir::new().unwrap();
        let (config, versions) = setup(tmp.path());

        let data = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"k1", 1, Some(b"v1")), (b"k2", 2, Some(b"v2"))],
        );
        let dels = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"k1", 5, None)],
        );
        versions
            .log_and_apply(VersionEdit {
                added: vec![(0, data), (0, dels)],
                ..Default::default()
            })
            .unwrap();

        let compactor = Compactor::new(config, versions.clone());
        compactor.maybe_compact().unwrap();

        // Nothing below L1, so the tombstone and the shadowed value are gone.
        let version = versions.current();
        let output = &version.level(1)[0];
        assert_eq!(output.meta().entry_count, 1);
        assert!(version.get(b"k1").unwrap().is_none());
        assert!(version.get(b"k2").unwrap().is_some());
    }

    #[test]
    fn tombstones_kept_when_deeper_data_overlaps() {
        let tmp = TempDir::new().unwrap();
        let (config, versions) = setup(tmp.path());

        // Old value lives at L2; the delete compacts from L0 to L1 and must
        // keep shadowing it.
        let deep = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"k1", 1, Some(b"ancient"))],
        );
        let l0a = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"k1", 5, None)],
        );
        let l0b = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"k2", 6, Some(b"v2"))],
        );
        versions
            .log_and_apply(VersionEdit {
                added: vec![(2, deep), (0, l0a), (0, l0b)],
                ..Default::default()
            })
            .unwrap();

        let compactor = Compactor::new(config, versions.clone());
        let task = compactor.pick(&versions.current()).unwrap();
        assert!(!task.drop_tombstones);
        compactor.run(task).unwrap();

        // The tombstone still wins over the L2 value.
        let version = versions.current();
        assert!(version.get(b"k1").unwrap().unwrap().1.is_none());
    }

    #[test]
    fn tombstone_outside_source_range_is_kept() {
        let tmp = TempDir::new().unwrap();
        let (config, versions) = setup(tmp.path());

        // "x" has an old value at L2 and a tombstone in a wide L1 table.
        // The L0 tables being compacted stop at "c", but the rewrite of the
        // L1 table must keep the tombstone for "x".
        let deep = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"x", 1, Some(b"ancient"))],
        );
        let wide = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"a", 2, Some(b"va")), (b"x", 5, None)],
        );
        let l0a = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"a", 7, Some(b"new"))],
        );
        let l0b = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"c", 8, Some(b"vc"))],
        );
        versions
            .log_and_apply(VersionEdit {
                added: vec![(2, deep), (1, wide), (0, l0a), (0, l0b)],
                ..Default::default()
            })
            .unwrap();

        let compactor = Compactor::new(config, versions.clone());
        let task = compactor.pick(&versions.current()).unwrap();
        assert!(!task.drop_tombstones);
        compactor.run(task).unwrap();

        // The tombstone still shadows the L2 value.
        let version = versions.current();
        assert_eq!(version.get(b"x").unwrap(), Some((5, None)));
        assert_eq!(
            version.get(b"a").unwrap().unwrap().1.as_deref(),
            Some(b"new".as_slice())
        );
    }

    #[test]
    fn obsolete_inputs_are_deleted() {
        let tmp = TempDir::new().unwrap();
        let (config, versions) = setup(tmp.path());

        let a_id = versions.allocate_file_number();
        let a = build_table(tmp.path(), a_id, &[(b"a", 1, Some(b"1"))]);
        let b_id = versions.allocate_file_number();
        let b = build_table(tmp.path(), b_id, &[(b"b", 2, Some(b"2"))]);
        versions
            .log_and_apply(VersionEdit {
                added: vec![(0, a), (0, b)],
                ..Default::default()
            })
            .unwrap();

        let compactor = Compactor::new(config, versions.clone());
        compactor.maybe_compact().unwrap();

        assert!(!table_path(tmp.path(), a_id).exists());
        assert!(!table_path(tmp.path(), b_id).exists());
    }

    #[test]
    fn no_pick_below_trigger() {
        let tmp = TempDir::new().unwrap();
        let (config, versions) = setup(tmp.path());

        let t = build_table(
            tmp.path(),
            versions.allocate_file_number(),
            &[(b"a", 1, Some(b"1"))],
        );
        versions
            .log_and_apply(VersionEdit {
                added: vec![(0, t)],
                ..Default::default()
            })
            .unwrap();

        let compactor = Compactor::new(config, versions.clone());
        assert!(compactor.pick(&versions.current()).is_none());
    }
}
