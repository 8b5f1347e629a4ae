//! Configuration for StrataKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a StrataKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── CURRENT              (names the active manifest)
    ///     ├── MANIFEST-000001      (version edit log)
    ///     ├── 000003.wal           (write-ahead log, numbered)
    ///     └── 000004.sst           (sorted tables, numbered)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Sorted Table Configuration
    // -------------------------------------------------------------------------
    /// Target data block size before compression (in bytes)
    pub block_size: usize,

    /// Compress data blocks with lz4 (blocks that do not shrink stay raw)
    pub block_compression: bool,

    /// Bloom filter budget; 10 bits/key gives roughly a 1% false positive rate
    pub bloom_bits_per_key: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Number of L0 tables that triggers a compaction into L1
    pub l0_compaction_trigger: usize,

    /// Target total size of L1 (in bytes); deeper levels grow by the multiplier
    pub level_base_size: u64,

    /// Size multiplier between adjacent levels
    pub level_size_multiplier: u64,

    /// Number of levels (L0 included)
    pub max_levels: usize,

    /// Target size of a single table produced by compaction (in bytes)
    pub target_table_size: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted records (balanced durability/performance)
    EveryNRecords { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stratakv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MiB
            block_size: 4 * 1024,                 // 4 KiB
            block_compression: true,
            bloom_bits_per_key: 10,
            l0_compaction_trigger: 4,
            level_base_size: 8 * 1024 * 1024, // 8 MiB
            level_size_multiplier: 10,
            max_levels: 7,
            target_table_size: 2 * 1024 * 1024, // 2 MiB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate tuning knobs that would otherwise fail in confusing places.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_levels < 2 {
            return Err(crate::StrataError::Config(
                "max_levels must be at least 2".to_string(),
            ));
        }
        if self.block_size < 64 {
            return Err(crate::StrataError::Config(
                "block_size must be at least 64 bytes".to_string(),
            ));
        }
        if self.memtable_size_limit == 0 || self.target_table_size == 0 {
            return Err(crate::StrataError::Config(
                "size limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the target block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Enable or disable lz4 block compression
    pub fn block_compression(mut self, enabled: bool) -> Self {
        self.config.block_compression = enabled;
        self
    }

    /// Set the bloom filter bits per key
    pub fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.config.bloom_bits_per_key = bits;
        self
    }

    /// Set the L0 table count that triggers compaction
    pub fn l0_compaction_trigger(mut self, count: usize) -> Self {
        self.config.l0_compaction_trigger = count;
        self
    }

    /// Set the target size of L1 (in bytes)
    pub fn level_base_size(mut self, size: u64) -> Self {
        self.config.level_base_size = size;
        self
    }

    /// Set the size multiplier between levels
    pub fn level_size_multiplier(mut self, multiplier: u64) -> Self {
        self.config.level_size_multiplier = multiplier;
        self
    }

    /// Set the number of levels
    pub fn max_levels(mut self, levels: usize) -> Self {
        self.config.max_levels = levels;
        self
    }

    /// Set the target size of compaction output tables (in bytes)
    pub fn target_table_size(mut self, size: u64) -> Self {
        self.config.target_table_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
