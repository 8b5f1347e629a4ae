//! Manifest: append-only log of version deltas.
//!
//! Every flush and compaction commits one `VersionEdit`. On startup the
//! edits are replayed in order to reconstruct the last committed version.
//! Records use the same crc-framed encoding as the WAL, so a torn tail is
//! detected the same way: replay truncates at the first bad record and the
//! loss is bounded to that tail.
//!
//! The `CURRENT` file names the active manifest (`MANIFEST-{n:06}`) and is
//! replaced atomically via a temp file + rename.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StrataError};
use crate::storage::TableMeta;
use crate::wal::{decode_frame, encode_frame};

/// Name of the pointer file inside the data directory.
pub const CURRENT_FILE: &str = "CURRENT";

/// One committed delta against the previous version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionEdit {
    /// Lowest WAL number still containing unflushed records.
    pub log_number: Option<u64>,

    /// High-water mark for file numbering (tables, WALs, manifests).
    pub next_file_number: Option<u64>,

    /// Highest sequence number committed at the time of this edit.
    pub last_sequence: Option<u64>,

    /// Tables added: (level, metadata).
    pub added: Vec<(u32, TableMeta)>,

    /// Tables removed: (level, table id).
    pub deleted: Vec<(u32, u64)>,
}

/// Build the path of a numbered manifest file.
pub fn manifest_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{:06}", number))
}

/// Append handle for the active manifest file
pub struct Manifest {
    writer: BufWriter<File>,
}

impl Manifest {
    /// Create a fresh manifest file (fails if it already exists — numbers
    /// are never reused).
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let path = manifest_path(dir, number);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one edit and make it durable before returning.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        let payload = bincode::serialize(edit)?;
        self.writer.write_all(&encode_frame(&payload))?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Replay all well-formed edits from a manifest file.
    ///
    /// A corrupt or torn record truncates the replay there (logged). A
    /// manifest with bytes but no valid record at all is fatal.
    pub fn replay(path: &Path) -> Result<Vec<VersionEdit>> {
        let data = fs::read(path)?;

        let mut edits = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            match decode_frame(&data[pos..]) {
                Ok((payload, consumed)) => {
                    let edit: VersionEdit = bincode::deserialize(payload)?;
                    edits.push(edit);
                    pos += consumed;
                }
                Err(_) => {
                    warn!(
                        path = %path.display(),
                        valid_bytes = pos,
                        dropped_bytes = data.len() - pos,
                        "manifest has a corrupt tail; truncating replay"
                    );
                    break;
                }
            }
        }

        if edits.is_empty() {
            return Err(StrataError::Manifest(format!(
                "manifest {} contains no valid record",
                path.display()
            )));
        }
        Ok(edits)
    }
}

// =============================================================================
// CURRENT pointer file
// =============================================================================

/// Read the CURRENT file; `None` if the store is brand new.
pub fn read_current(dir: &Path) -> Result<Option<PathBuf>> {
    let current = dir.join(CURRENT_FILE);
    if !current.exists() {
        return Ok(None);
    }
    let name = fs::read_to_string(&current)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(StrataError::Manifest("CURRENT file is empty".into()));
    }
    Ok(Some(dir.join(name)))
}

/// Atomically point CURRENT at the manifest with the given number.
pub fn set_current(dir: &Path, manifest_number: u64) -> Result<()> {
    let tmp = dir.join("CURRENT.tmp");
    let name = format!("MANIFEST-{:06}\n", manifest_number);

    let mut file = File::create(&tmp)?;
    file.write_all(name.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, dir.join(CURRENT_FILE))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(id: u64) -> TableMeta {
        TableMeta {
            id,
            min_key: b"a".to_vec(),
            max_key: b"z".to_vec(),
            entry_count: 10,
            file_size: 1000,
        }
    }

    #[test]
    fn append_and_replay() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::create(dir.path(), 1).unwrap();

        manifest
            .append(&VersionEdit {
                next_file_number: Some(5),
                added: vec![(0, meta(2))],
                ..Default::default()
            })
            .unwrap();
        manifest
            .append(&VersionEdit {
                added: vec![(1, meta(3))],
                deleted: vec![(0, 2)],
                ..Default::default()
            })
            .unwrap();

        let edits = Manifest::replay(&manifest_path(dir.path(), 1)).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].next_file_number, Some(5));
        assert_eq!(edits[1].deleted, vec![(0, 2)]);
    }

    #[test]
    fn corrupt_tail_truncates_replay() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path(), 1);
        {
            let mut manifest = Manifest::create(dir.path(), 1).unwrap();
            manifest
                .append(&VersionEdit {
                    next_file_number: Some(2),
                    ..Default::default()
                })
                .unwrap();
            manifest
                .append(&VersionEdit {
                    next_file_number: Some(3),
                    ..Default::default()
                })
                .unwrap();
        }

        // Flip a byte in the last record.
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let edits = Manifest::replay(&path).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].next_file_number, Some(2));
    }

    #[test]
    fn fully_corrupt_manifest_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("MANIFEST-000001");
        fs::write(&path, b"not a manifest at all").unwrap();
        assert!(Manifest::replay(&path).is_err());
    }

    #[test]
    fn current_pointer_roundtrip() {
        let dir = TempDir::new().unwrap();
        assert!(read_current(dir.path()).unwrap().is_none());

        set_current(dir.path(), 7).unwrap();
        let path = read_current(dir.path()).unwrap().unwrap();
        assert_eq!(path, manifest_path(dir.path(), 7));
    }
}
