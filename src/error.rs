//! Error types for popout
//!
//! Provides a unified error type for all queue and storage operations.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;

/// Unified error type for popout operations
#[derive(Debug, Error)]
pub enum QueueError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Corrupted data in file '{}' at position {offset}: {reason}", .path.display())]
    Corrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("File '{}' doesn't have index group", .0.display())]
    InvalidName(PathBuf),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Queue limit exceeded: {limit}")]
    LimitExceeded { limit: String },
}

impl QueueError {
    /// Build a corruption error for `path` at `offset`
    pub fn corrupted(path: &Path, offset: u64, reason: impl Into<String>) -> Self {
        QueueError::Corrupted {
            path: path.to_path_buf(),
            offset,
            reason: reason.into(),
        }
    }

    /// Reclassify a read failure: a short read means the segment is corrupted,
    /// anything else is a filesystem failure and stays fatal.
    pub(crate) fn from_read(err: io::Error, path: &Path, offset: u64) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::corrupted(path, offset, "unexpected end of file"),
            _ => QueueError::Io(err),
        }
    }

    /// Whether the corruption policy may recover from this error
    pub fn is_corruption(&self) -> bool {
        matches!(self, QueueError::Corrupted { .. })
    }

    /// File position where corruption was detected
    pub fn corruption_offset(&self) -> Option<u64> {
        match self {
            QueueError::Corrupted { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
