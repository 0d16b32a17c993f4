//! Storage Module
//!
//! Segment files on disk and the engine that moves data between them.
//!
//! ## Responsibilities
//! - Persist every write as a WAL segment
//! - Merge WAL segments into compressed files once too many accumulate
//! - Serve the oldest record first (compressed before WAL)
//! - Remove records in place with JUMP headers
//!
//! ## File Formats
//! ```text
//! {name}-{index}.wal          raw payload of one write, no framing
//!
//! {name}-{index}.compressed
//! ┌──────────────────┬─────────┬──────────────────┬─────────┬─────┬──────────┐
//! │ RECORD(len) [9]  │ payload │ RECORD(len) [9]  │ payload │ ... │ END [9]  │
//! └──────────────────┴─────────┴──────────────────┴─────────┴─────┴──────────┘
//! (file is pre-sized to its budget; bytes after END are zero)
//! ```

mod backend;
mod compressed;
mod files;
mod header;
mod wal;

pub use backend::{BackendCursor, StorageBackend};
pub use compressed::{CompactionResult, CompressedSegments};
pub use files::FilesManager;
pub use header::{skip_jumps, Marker, RecordHeader, HEADER_SIZE};
pub use wal::WalSegments;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::BytesMut;

use crate::config::{CorruptionAction, CorruptionPolicy};
use crate::error::{QueueError, Result};

/// Segment file role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Wal,
    Compressed,
}

/// Location of one record on disk
///
/// A whole WAL file (`offset` 0, `len` = file size) or the payload of one
/// RECORD frame inside a compressed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSlice {
    pub path: PathBuf,
    pub offset: u64,
    pub len: u64,
    pub kind: SegmentKind,
}

/// Result of reading the next record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the buffer
    Read(usize),

    /// No records left
    Exhausted,
}

/// One tracked segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub kind: SegmentKind,
    pub size: u64,
}

/// How a reader continues after a corrupted segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// Treat the segment as exhausted
    Skip,

    /// Continue scanning at this offset
    ResumeAt(u64),
}

/// Route a read error through the corruption policy
///
/// Non-corruption errors and `Fail` decisions are returned as errors.
pub(crate) fn recover(
    policy: &CorruptionPolicy,
    error: QueueError,
    kind: SegmentKind,
) -> Result<Recovery> {
    if !error.is_corruption() {
        return Err(error);
    }

    match policy.decide(&error) {
        CorruptionAction::Fail => Err(error),
        CorruptionAction::Discard => {
            tracing::warn!(error = %error, "Discarding corrupted segment");
            Ok(Recovery::Skip)
        }
        CorruptionAction::Resume(offset) => {
            let failed_at = error.corruption_offset().unwrap_or(0);
            if kind == SegmentKind::Compressed && offset > failed_at {
                tracing::warn!(error = %error, resume_at = offset, "Resuming past corrupted region");
                Ok(Recovery::ResumeAt(offset))
            } else {
                tracing::warn!(
                    error = %error,
                    resume_at = offset,
                    "Resume offset not usable, discarding segment"
                );
                Ok(Recovery::Skip)
            }
        }
    }
}

/// Append the bytes covered by `slice` to `buf`
pub(crate) fn read_slice(slice: &SegmentSlice, buf: &mut BytesMut) -> Result<usize> {
    let len = usize::try_from(slice.len).map_err(|_| {
        QueueError::corrupted(&slice.path, slice.offset, "record does not fit in memory")
    })?;

    let mut file = File::open(&slice.path)?;
    file.seek(SeekFrom::Start(slice.offset))?;

    let start = buf.len();
    buf.resize(start + len, 0);
    if let Err(e) = file.read_exact(&mut buf[start..]) {
        buf.truncate(start);
        return Err(QueueError::from_read(e, &slice.path, slice.offset));
    }
    Ok(len)
}
