//! Storage Engine
//!
//! The facade that ties the pieces together: WAL for durability, memtable
//! for recent writes, leveled sorted tables for everything older, a version
//! set for bookkeeping and a background worker for flushes and compactions.
//!
//! ## Write path
//! 1. Take the write lock (one writer at a time; readers are unaffected)
//! 2. Allocate a sequence number
//! 3. Append to the WAL (durability per the configured sync strategy)
//! 4. Insert into the active memtable (visibility)
//! 5. If the memtable is over its limit, freeze it, start a fresh WAL and
//!    hand the frozen table to the background worker
//!
//! ## Read path
//! Active memtable → frozen memtable → tables, newest first. A tombstone
//! found anywhere along the way is an authoritative "not found".
//!
//! ## Recovery
//! The manifest restores the table levels; WAL files newer than the flushed
//! horizon are replayed into a fresh memtable. A torn WAL tail loses only
//! the record that was being written during the crash.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::compaction::Compactor;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::iterator::{EntrySource, MergeIterator};
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{table_path, TableBuilder, MAX_KEY_LEN};
use crate::version::{Version, VersionEdit, VersionSet};
use crate::wal::{parse_wal_number, wal_path, Operation, WalReader, WalRecord, WalWriter};

/// Flush attempts before giving up and latching a background error.
const FLUSH_RETRY_LIMIT: u32 = 3;

// =============================================================================
// Engine
// =============================================================================

/// An open key-value store.
///
/// `Engine` is cheap to share behind an `Arc`; all methods take `&self`.
/// Writes are serialized internally, reads run concurrently.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner {
    config: Config,
    versions: Arc<VersionSet>,
    compactor: Compactor,

    /// Write critical section: WAL append order must match sequence order.
    write: Mutex<WriteState>,

    /// Memtables visible to readers.
    mem: RwLock<MemSnapshot>,

    /// Handoff slot between the writer and the flush worker. At most one
    /// memtable is in flight; a writer needing to rotate waits here.
    flush: Mutex<Option<PendingFlush>>,
    flush_cv: Condvar,

    job_tx: Sender<Job>,
    closed: AtomicBool,

    /// Set when a background flush has been given up on. Latches the engine
    /// read-only: the frozen memtable stays visible and its WAL is never
    /// deleted, so the data is recovered on the next open.
    fatal: RwLock<Option<String>>,
}

struct WriteState {
    wal: WalWriter,
    wal_number: u64,
}

struct MemSnapshot {
    active: Arc<MemTable>,
    frozen: Option<Arc<MemTable>>,
}

#[derive(Clone)]
struct PendingFlush {
    memtable: Arc<MemTable>,
    /// WAL number active after the rotation. Once this memtable is in a
    /// table, every WAL below this number is fully flushed.
    log_number: u64,
}

enum Job {
    Flush,
    Shutdown,
}

impl Engine {
    /// Open (or create) a store with the given configuration.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let versions = Arc::new(VersionSet::open(&config.data_dir, config.max_levels)?);

        // Replay WALs above the flushed horizon, oldest first so later
        // records overwrite earlier ones at equal keys.
        let active = Arc::new(MemTable::new());
        let mut replayed = 0usize;
        let mut max_seq = 0u64;
        let mut wal_files: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&config.data_dir)? {
            let path = entry?.path();
            if let Some(number) = parse_wal_number(&path) {
                wal_files.push((number, path));
            }
        }
        wal_files.sort();
        for (number, path) in &wal_files {
            if *number < versions.log_number() {
                // Fully flushed in a previous run; normally already deleted.
                let _ = fs::remove_file(path);
                continue;
            }
            let replay = WalReader::replay(path)?;
            for record in replay.records {
                max_seq = max_seq.max(record.seq);
                replayed += 1;
                match record.op {
                    Operation::Put { key, value } => {
                        active.insert(key, record.seq, MemTableEntry::Value(value))
                    }
                    Operation::Delete { key } => {
                        active.insert(key, record.seq, MemTableEntry::Tombstone)
                    }
                }
            }
        }
        versions.bump_sequence_to(max_seq);

        // Fresh WAL for this session. The replayed files stay on disk until
        // their records reach a table.
        let wal_number = versions.allocate_file_number();
        let wal = WalWriter::create(
            &wal_path(&config.data_dir, wal_number),
            config.wal_sync_strategy,
        )?;

        let (job_tx, job_rx) = channel::unbounded();
        let compactor = Compactor::new(config.clone(), versions.clone());
        let inner = Arc::new(EngineInner {
            config: config.clone(),
            versions,
            compactor,
            write: Mutex::new(WriteState { wal, wal_number }),
            mem: RwLock::new(MemSnapshot {
                active,
                frozen: None,
            }),
            flush: Mutex::new(None),
            flush_cv: Condvar::new(),
            job_tx,
            closed: AtomicBool::new(false),
            fatal: RwLock::new(None),
        });

        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("strata-worker".into())
                .spawn(move || worker_loop(inner, job_rx))
                .map_err(StrataError::Io)?
        };

        info!(
            data_dir = %config.data_dir.display(),
            replayed_records = replayed,
            last_sequence = inner.versions.last_sequence(),
            "engine opened"
        );

        let engine = Self {
            inner,
            worker: Mutex::new(Some(worker)),
        };

        // A large replay can leave the memtable already over its limit.
        if engine.inner.mem.read().active.approximate_size() >= config.memtable_size_limit {
            let mut write = engine.inner.write.lock();
            engine.inner.rotate(&mut write)?;
        }

        Ok(engine)
    }

    /// Open a store at `path` with default configuration.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get the value for a key. A deleted key reads as absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;

        let (active, frozen) = {
            let mem = self.inner.mem.read();
            (mem.active.clone(), mem.frozen.clone())
        };
        if let Some((_, entry)) = active.get(key) {
            return Ok(entry.into_option());
        }
        if let Some(frozen) = frozen {
            if let Some((_, entry)) = frozen.get(key) {
                return Ok(entry.into_option());
            }
        }

        let version = self.inner.versions.current();
        Ok(version.get(key)?.and_then(|(_, value)| value))
    }

    /// Store a key-value pair. Durable per the WAL sync strategy before the
    /// write becomes visible.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.write(Operation::Put {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Delete a key. Writes a tombstone; space is reclaimed by compaction.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.write(Operation::Delete { key: key.into() })
    }

    fn write(&self, op: Operation) -> Result<()> {
        self.check_open()?;
        self.inner.check_writable()?;

        let key_len = match &op {
            Operation::Put { key, .. } | Operation::Delete { key } => key.len(),
        };
        if key_len > MAX_KEY_LEN {
            return Err(StrataError::InvalidArgument(format!(
                "key is {} bytes; the table format caps keys at {} bytes",
                key_len, MAX_KEY_LEN
            )));
        }

        let mut write = self.inner.write.lock();
        let seq = self.inner.versions.next_sequence();
        let record = WalRecord { seq, op };
        write.wal.append(&record)?;

        let (key, entry) = match record.op {
            Operation::Put { key, value } => (key, MemTableEntry::Value(value)),
            Operation::Delete { key } => (key, MemTableEntry::Tombstone),
        };
        let active = self.inner.mem.read().active.clone();
        active.insert(key, seq, entry);

        if active.approximate_size() >= self.inner.config.memtable_size_limit {
            self.inner.rotate(&mut write)?;
        }
        Ok(())
    }

    /// Ordered scan over `[start, end)`; `None` bounds are unbounded.
    ///
    /// The scan is a point-in-time snapshot: it pins the memtables and table
    /// files that existed when it was created, so concurrent writes, flushes
    /// and compactions do not disturb it. Tombstoned keys are skipped.
    pub fn iter(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<RangeIter> {
        self.check_open()?;

        let (active, frozen) = {
            let mem = self.inner.mem.read();
            (mem.active.clone(), mem.frozen.clone())
        };
        let version = self.inner.versions.current();

        let mut sources: Vec<EntrySource> = Vec::new();
        sources.push(mem_source(active.scan(start, end)));
        if let Some(frozen) = frozen {
            sources.push(mem_source(frozen.scan(start, end)));
        }
        sources.extend(version.range_sources(start, end));

        Ok(RangeIter {
            merge: MergeIterator::new(sources)?,
            _version: version,
        })
    }

    /// Force the active memtable to a table on disk; returns once it (and
    /// any previously frozen memtable) has been committed.
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;

        {
            let mut write = self.inner.write.lock();
            if !self.inner.mem.read().active.is_empty() {
                self.inner.rotate(&mut write)?;
            }
        }
        let mut flush = self.inner.flush.lock();
        while flush.is_some() {
            self.inner.flush_cv.wait(&mut flush);
        }
        drop(flush);
        self.inner.check_writable()?;
        Ok(())
    }

    /// Run compactions on the calling thread until every level is within
    /// its target.
    pub fn compact(&self) -> Result<()> {
        self.check_open()?;
        self.inner.compactor.maybe_compact()
    }

    /// A point-in-time summary of the store's shape.
    pub fn stats(&self) -> EngineStats {
        let (memtable_bytes, frozen) = {
            let mem = self.inner.mem.read();
            (
                mem.active.approximate_size(),
                mem.frozen.is_some(),
            )
        };
        let version = self.inner.versions.current();
        let levels = (0..version.level_count())
            .map(|l| LevelStats {
                tables: version.level(l).len(),
                bytes: version.level_size(l),
            })
            .collect();
        EngineStats {
            memtable_bytes,
            frozen_memtable: frozen,
            levels,
            last_sequence: self.inner.versions.last_sequence(),
        }
    }

    /// Shut down: sync the WAL, drain the background worker, stop accepting
    /// operations. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut write = self.inner.write.lock();
            write.wal.sync()?;
        }
        let _ = self.inner.job_tx.send(Job::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        info!("engine closed");
        Ok(())
    }

    /// Delete a store's files from disk. The store must not be open.
    ///
    /// Only files the engine creates are touched; anything else in the
    /// directory is left alone (and keeps the directory from being removed).
    pub fn destroy(path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let ours = name == "CURRENT"
                || name == "CURRENT.tmp"
                || name.starts_with("MANIFEST-")
                || name.ends_with(".wal")
                || name.ends_with(".sst");
            if ours {
                fs::remove_file(entry.path())?;
            }
        }
        let _ = fs::remove_dir(path);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StrataError::Shutdown);
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn mem_source(entries: Vec<(Vec<u8>, u64, MemTableEntry)>) -> EntrySource {
    Box::new(
        entries
            .into_iter()
            .map(|(key, seq, entry)| Ok((key, seq, entry.into_option()))),
    )
}

// =============================================================================
// Inner: rotation and the background worker
// =============================================================================

impl EngineInner {
    /// Freeze the active memtable and start a fresh WAL.
    ///
    /// Called with the write lock held. Blocks while a previous flush is
    /// still in flight; that wait is the engine's write backpressure.
    fn rotate(&self, write: &mut WriteState) -> Result<()> {
        {
            let mut flush = self.flush.lock();
            while flush.is_some() {
                self.flush_cv.wait(&mut flush);
            }
        }
        // A writer parked above may have been woken by a flush that was
        // given up on; rotating now would overwrite the frozen memtable.
        self.check_writable()?;

        // Everything in the old WAL must be on disk before its memtable is
        // the only in-memory copy.
        write.wal.sync()?;

        let new_number = self.versions.allocate_file_number();
        let new_wal = WalWriter::create(
            &wal_path(&self.config.data_dir, new_number),
            self.config.wal_sync_strategy,
        )?;

        let frozen;
        {
            let mut mem = self.mem.write();
            frozen = mem.active.clone();
            mem.frozen = Some(frozen.clone());
            mem.active = Arc::new(MemTable::new());
        }

        debug!(
            old_wal = write.wal_number,
            new_wal = new_number,
            frozen_bytes = frozen.approximate_size(),
            frozen_keys = frozen.len(),
            "memtable rotated"
        );

        write.wal = new_wal;
        write.wal_number = new_number;

        *self.flush.lock() = Some(PendingFlush {
            memtable: frozen,
            log_number: new_number,
        });
        let _ = self.job_tx.send(Job::Flush);
        Ok(())
    }

    /// Refuse writes once a background flush has been given up on. More
    /// writes would eventually rotate over the frozen memtable and let the
    /// flushed horizon pass its WAL.
    fn check_writable(&self) -> Result<()> {
        if let Some(msg) = self.fatal.read().as_ref() {
            return Err(StrataError::Background(msg.clone()));
        }
        Ok(())
    }

    /// Flush the pending memtable, retrying a few times on failure.
    ///
    /// On giving up the error is latched and the engine stops accepting
    /// writes. The frozen memtable keeps serving reads and its records stay
    /// in their WAL, so the next open recovers them.
    fn run_pending_flush(&self) {
        let pending = match self.flush.lock().clone() {
            Some(p) => p,
            None => return,
        };

        let mut attempt = 0u32;
        let flushed = loop {
            match self.flush_memtable(&pending) {
                Ok(()) => break true,
                Err(e) => {
                    attempt += 1;
                    if attempt >= FLUSH_RETRY_LIMIT {
                        error!(
                            error = %e,
                            "memtable flush failed; refusing further writes, data remains in the WAL"
                        );
                        *self.fatal.write() = Some(e.to_string());
                        break false;
                    }
                    warn!(error = %e, attempt, "memtable flush failed; retrying");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        };

        if flushed {
            self.mem.write().frozen = None;
        }
        {
            let mut flush = self.flush.lock();
            *flush = None;
            self.flush_cv.notify_all();
        }
        if flushed {
            self.delete_obsolete_wals();
            if let Err(e) = self.compactor.maybe_compact() {
                warn!(error = %e, "background compaction failed");
            }
        }
    }

    /// Write the frozen memtable as an L0 table and commit it.
    fn flush_memtable(&self, pending: &PendingFlush) -> Result<()> {
        let entries = pending.memtable.entries();
        if entries.is_empty() {
            // Nothing to write; still advance the flushed horizon.
            self.versions.log_and_apply(VersionEdit {
                log_number: Some(pending.log_number),
                ..Default::default()
            })?;
            return Ok(());
        }

        let id = self.versions.allocate_file_number();
        let path = table_path(&self.config.data_dir, id);

        let result = (|| -> Result<VersionEdit> {
            let mut builder = TableBuilder::new(
                &path,
                id,
                self.config.block_size,
                self.config.block_compression,
                self.config.bloom_bits_per_key,
            )?;
            for (key, seq, entry) in &entries {
                let value = match entry {
                    MemTableEntry::Value(v) => Some(v.as_slice()),
                    MemTableEntry::Tombstone => None,
                };
                builder.add(key, *seq, value)?;
            }
            let meta = builder.finish()?;
            Ok(VersionEdit {
                log_number: Some(pending.log_number),
                added: vec![(0, meta)],
                ..Default::default()
            })
        })();

        match result {
            Ok(edit) => {
                self.versions.log_and_apply(edit)?;
                info!(table = id, entries = entries.len(), "memtable flushed");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Delete WAL files whose records are all captured in tables.
    fn delete_obsolete_wals(&self) {
        let horizon = self.versions.log_number();
        let entries = match fs::read_dir(&self.config.data_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(number) = parse_wal_number(&path) {
                if number < horizon {
                    if let Err(e) = fs::remove_file(&path) {
                        debug!(path = %path.display(), error = %e, "failed to delete old WAL");
                    } else {
                        debug!(path = %path.display(), "deleted flushed WAL");
                    }
                }
            }
        }
    }
}

fn worker_loop(inner: Arc<EngineInner>, jobs: Receiver<Job>) {
    for job in jobs {
        match job {
            Job::Flush => inner.run_pending_flush(),
            Job::Shutdown => break,
        }
    }
    // A rotation may have raced the shutdown message.
    inner.run_pending_flush();
}

// =============================================================================
// Range iterator
// =============================================================================

/// Snapshot iterator over live key-value pairs in key order.
pub struct RangeIter {
    merge: MergeIterator,
    /// Pins the table files for the lifetime of the scan.
    _version: Arc<Version>,
}

impl Iterator for RangeIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.merge.next()? {
                Ok((key, _, Some(value))) => return Some(Ok((key, value))),
                Ok((_, _, None)) => continue, // tombstone
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of the store's shape, for operators and tests.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Approximate bytes in the active memtable.
    pub memtable_bytes: usize,

    /// Whether a frozen memtable is waiting to be flushed.
    pub frozen_memtable: bool,

    /// Table count and total bytes per level.
    pub levels: Vec<LevelStats>,

    /// Highest sequence number allocated so far.
    pub last_sequence: u64,
}

#[derive(Debug, Clone)]
pub struct LevelStats {
    pub tables: usize,
    pub bytes: u64,
}
