//! Error types for StrataKV
//!
//! Provides a unified error type for all operations.
//!
//! An absent key is never an error: reads return `Ok(None)`.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataKV operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    /// Checksum mismatch or malformed on-disk structure. Isolated to the
    /// affected block or record; only an unreadable manifest is fatal.
    #[error("corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Manifest Errors
    // -------------------------------------------------------------------------
    #[error("manifest error: {0}")]
    Manifest(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Invalid Arguments
    // -------------------------------------------------------------------------
    /// A caller-supplied key the on-disk format cannot represent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    /// A background flush gave up after repeated failures. The engine
    /// refuses further writes until reopened; the unflushed records are
    /// still in their WAL.
    #[error("background flush failed: {0}")]
    Background(String),

    /// The engine is closing and the background worker is gone.
    #[error("engine shut down")]
    Shutdown,
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}
