//! Crate-wide error type.

use std::path::PathBuf;

/// Errors produced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated record header at offset {offset} in {path}")]
    TruncatedHeader { path: PathBuf, offset: u64 },

    #[error("truncated record body at offset {offset} in {path}")]
    TruncatedBody { path: PathBuf, offset: u64 },

    #[error("corrupted record at offset {offset} in {path}: CRC mismatch (expected {expected:#010x}, got {actual:#010x})")]
    CorruptRecord { path: PathBuf, offset: u64, expected: u32, actual: u32 },

    #[error("invalid data file name {name:?}")]
    InvalidFileName { name: String },

    #[error("encoded record of {size} bytes exceeds max_file_size of {max_file_size} bytes")]
    SizeExceeded { size: u64, max_file_size: u32 },

    #[error("engine is closed")]
    Closed,

    #[error("another process already holds the write lock on {path}")]
    AlreadyLocked { path: PathBuf },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
