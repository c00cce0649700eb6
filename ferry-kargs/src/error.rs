//! Error types for kernel-argument marshalling

use thiserror::Error;

/// Main error type for argument-buffer lifecycles and segmented memory
/// construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KargsError {
    #[error("allocation of {num_bytes} bytes failed for {what}[{index}]")]
    AllocationFailed {
        what: &'static str,
        index: usize,
        num_bytes: usize,
    },

    #[error("mapped copy failed for {what}[{index}]")]
    CopyFailed { what: &'static str, index: usize },

    #[error("mapping the symbol table for writing failed")]
    TableWriteFailed,
}

/// Convenient Result type
pub type Result<T> = std::result::Result<T, KargsError>;
