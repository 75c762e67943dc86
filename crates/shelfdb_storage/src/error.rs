//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write was attempted without an open batch.
    #[error("no open write batch")]
    NoOpenBatch,

    /// A batch was opened while another was still pending.
    #[error("a write batch is already open")]
    BatchAlreadyOpen,

    /// The store contents are corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}
