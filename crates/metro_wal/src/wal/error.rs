use std::path::PathBuf;

use thiserror::Error;

/// Result type for WAL operations.
pub type Result<T> = std::result::Result<T, WalError>;

/// Errors surfaced by the codec and merge engine.
///
/// Everything here is fatal to the caller except where the coordinator
/// explicitly decides otherwise; per-peer transport failures never reach
/// this type.
#[derive(Error, Debug)]
pub enum WalError {
    /// Framing or checksum failure while decoding a segment stream.
    #[error("corrupt log: {0}")]
    CorruptLog(String),

    /// The segment directory is missing or holds no segment files.
    #[error("no segment files found in {}", .0.display())]
    NotFound(PathBuf),

    /// Two entries share an index but disagree on term or payload.
    #[error("inconsistent log: entries at index {index} disagree")]
    InconsistentLog { index: u64 },

    /// A segment rewrite failed partway through.
    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
