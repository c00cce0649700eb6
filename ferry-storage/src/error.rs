//! Error types for container operations

use thiserror::Error;

/// Main error type for parsing and writing data-storage containers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("container i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("format tag {format:#010x} does not match magic {magic:#010x}")]
    FormatMismatch { format: u32, magic: u32 },

    #[error("invalid container header: {0}")]
    InvalidHeader(&'static str),

    #[error("invalid {table} table entry {index}")]
    InvalidEntry { table: &'static str, index: u32 },

    #[error("container payload of {size} bytes exceeds the format limit")]
    TooLarge { size: u64 },
}

/// Convenient Result type
pub type Result<T> = std::result::Result<T, StorageError>;
