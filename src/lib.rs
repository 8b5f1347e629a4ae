//! # StrataKV
//!
//! An embedded, ordered key-value store built on a log-structured
//! merge-tree. Runs in-process; a directory on disk is the whole database.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ Engine                                         │
//! │  put/delete ──► WAL ──► MemTable               │
//! │                           │ (flush)            │
//! │                           ▼                    │
//! │  get ◄── MemTable ◄── L0 tables ◄── L1..Ln     │
//! │                           │ (compaction)       │
//! │                           ▼                    │
//! │  Version Set ── MANIFEST ── CURRENT            │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! - **WAL**: every mutation is logged before it is applied, so a crash
//!   never loses an acknowledged write
//! - **MemTable**: sorted in-memory buffer for recent writes
//! - **Sorted tables**: immutable on-disk files, organized into levels by
//!   the background compactor
//! - **Version set**: tracks which files are live, committed through an
//!   append-only manifest
//!
//! ## Example
//!
//! ```no_run
//! use stratakv::{Config, Engine};
//!
//! fn main() -> stratakv::Result<()> {
//!     let engine = Engine::open(Config::builder().data_dir("./data").build())?;
//!
//!     engine.put("name", "strata")?;
//!     assert_eq!(engine.get(b"name")?, Some(b"strata".to_vec()));
//!
//!     engine.delete("name")?;
//!     assert_eq!(engine.get(b"name")?, None);
//!
//!     for pair in engine.iter(None, None)? {
//!         let (key, value) = pair?;
//!         println!("{:?} = {:?}", key, value);
//!     }
//!     engine.close()
//! }
//! ```

pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod storage;
pub mod version;
pub mod wal;

pub use config::{Config, ConfigBuilder, WalSyncStrategy};
pub use engine::{Engine, EngineStats, LevelStats, RangeIter};
pub use error::{Result, StrataError};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
