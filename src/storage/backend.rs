//! Storage Backend
//!
//! Unifies compressed segments (oldest data, read first) and WAL segments
//! (newest data, read after).
//!
//! ## Data Flow
//! ```text
//!   write ──► WAL segment ──(count > max)──► compress(all WAL) ──► .compressed
//!
//!   poll/peek ──► compressed records ──(exhausted)──► WAL segments
//! ```
//!
//! Compaction only ever merges the oldest WAL segments, so reading the
//! compressed files first keeps global FIFO order.

use std::fs::{self, File};
use std::path::PathBuf;

use bytes::BytesMut;

use crate::config::{CorruptionPolicy, QueueConfig};
use crate::error::{QueueError, Result};

use super::compressed::{locate_record, CompressedSegments};
use super::wal::{segment_len, WalSegments};
use super::{read_slice, recover, ReadOutcome, Recovery, SegmentInfo, SegmentKind, SegmentSlice};

/// Storage engine shared by both queue modes
///
/// ## Concurrency:
/// - Methods that touch files take `&mut self`
/// - Callers serialize access (queues wrap the backend in a fair lock)
#[derive(Debug)]
pub struct StorageBackend {
    wal: WalSegments,
    compressed: CompressedSegments,
    corruption_policy: CorruptionPolicy,
}

impl StorageBackend {
    /// Open (or create) the backend described by `config`
    ///
    /// With `restore_from_disk` disabled every existing segment is deleted.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        config.validate()?;

        let mut wal = WalSegments::open(
            config.wal_folder(),
            &config.name,
            config.wal_max_count(),
            config.sync_strategy,
            config.corruption_policy.clone(),
        )?;
        let mut compressed = CompressedSegments::open(
            config.compressed_folder(),
            &config.name,
            config.compressed_max_size(),
            config.sync_strategy,
            config.corruption_policy.clone(),
        )?;

        if !config.restore_from_disk {
            let discarded = wal.len() + compressed.len();
            wal.clear()?;
            compressed.clear()?;
            if discarded > 0 {
                tracing::info!(queue = %config.name, discarded, "Discarded previous segments");
            }
        }

        Ok(Self {
            wal,
            compressed,
            corruption_policy: config.corruption_policy.clone(),
        })
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Persist one record, compacting while too many WAL segments exist
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.append(bytes)?;
        self.compact_if_needed()
    }

    /// Persist one record as a new WAL segment without compacting
    ///
    /// Once this returns the record is on disk, whatever a later
    /// compaction does.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.wal.write(bytes)?;
        Ok(())
    }

    /// Compact while too many WAL segments exist
    pub fn compact_if_needed(&mut self) -> Result<()> {
        while self.wal.is_limit_exceeded() {
            let sources = self.wal.paths();
            let result = self.compressed.compress(&sources)?;
            self.wal.remove(&result.merged)?;
        }
        Ok(())
    }

    /// Merge every WAL segment into compressed files now
    pub fn compress(&mut self) -> Result<()> {
        let mut remaining = self.wal.paths();
        let mut passes = 0usize;

        while !remaining.is_empty() {
            let result = self.compressed.compress(&remaining)?;
            self.wal.remove(&result.merged)?;
            remaining = result.remaining;
            passes += 1;
        }

        if passes > 0 {
            tracing::debug!(passes, "Compressed all WAL segments");
        }
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Append the oldest record to `buf` and remove it
    pub fn poll_to(&mut self, buf: &mut BytesMut) -> Result<ReadOutcome> {
        match self.compressed.poll_to(buf)? {
            ReadOutcome::Exhausted => self.wal.poll_to(buf),
            read => Ok(read),
        }
    }

    /// Append the oldest record to `buf`
    pub fn peek_to(&mut self, buf: &mut BytesMut) -> Result<ReadOutcome> {
        match self.compressed.peek_to(buf)? {
            ReadOutcome::Exhausted => self.wal.peek_to(buf),
            read => Ok(read),
        }
    }

    /// Location of the oldest record
    pub fn peek_slice(&mut self) -> Result<Option<SegmentSlice>> {
        match self.compressed.peek_slice()? {
            Some(slice) => Ok(Some(slice)),
            None => self.wal.peek_slice(),
        }
    }

    /// Drop the oldest record, as located by `peek_slice`, without reading it
    pub fn consume(&mut self, slice: &SegmentSlice) -> Result<()> {
        match slice.kind {
            SegmentKind::Wal => self.wal.remove(std::slice::from_ref(&slice.path)),
            SegmentKind::Compressed => self.compressed.consume(slice),
        }
    }

    /// Append the bytes of `slice` to `buf`
    pub fn read_slice(&self, slice: &SegmentSlice, buf: &mut BytesMut) -> Result<usize> {
        read_slice(slice, buf)
    }

    /// Remove the record at `slice`
    ///
    /// A WAL slice deletes its segment file; a compressed slice gets a JUMP
    /// installed over its RECORD header.
    pub fn remove(&mut self, slice: &SegmentSlice) -> Result<()> {
        match slice.kind {
            SegmentKind::Wal => {
                if !self.wal.files().files().any(|path| *path == slice.path) {
                    return Err(QueueError::Unsupported(format!(
                        "WAL segment '{}' is not in the queue",
                        slice.path.display()
                    )));
                }
                self.wal.remove(std::slice::from_ref(&slice.path))
            }
            SegmentKind::Compressed => self.compressed.remove(slice),
        }
    }

    /// Cursor over every live record, oldest first
    pub fn cursor(&self) -> BackendCursor {
        BackendCursor {
            compressed: self.compressed.paths(),
            wal: self.wal.paths(),
            file_index: 0,
            current: None,
            corruption_policy: self.corruption_policy.clone(),
        }
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Delete every segment
    pub fn clear(&mut self) -> Result<()> {
        self.compressed.clear()?;
        self.wal.clear()
    }

    /// Sum of all tracked file sizes
    pub fn disk_size(&self) -> Result<u64> {
        Ok(self.compressed.disk_size()? + self.wal.disk_size()?)
    }

    /// Every tracked segment, compressed files first
    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        let mut segments = Vec::with_capacity(self.compressed.len() + self.wal.len());
        for (kind, paths) in [
            (SegmentKind::Compressed, self.compressed.paths()),
            (SegmentKind::Wal, self.wal.paths()),
        ] {
            for path in paths {
                let size = fs::metadata(&path)?.len();
                segments.push(SegmentInfo { path, kind, size });
            }
        }
        Ok(segments)
    }

    pub fn wal(&self) -> &WalSegments {
        &self.wal
    }

    pub fn compressed(&self) -> &CompressedSegments {
        &self.compressed
    }
}

/// Read-only cursor over the records of a backend
///
/// Takes a snapshot of the tracked files; it never mutates them. Corrupted
/// regions are skipped or resumed per the corruption policy.
#[derive(Debug)]
pub struct BackendCursor {
    compressed: Vec<PathBuf>,
    wal: Vec<PathBuf>,

    /// Position in `compressed` followed by `wal`
    file_index: usize,

    /// Open compressed file, its length and the next scan position
    current: Option<(File, u64, u64)>,

    corruption_policy: CorruptionPolicy,
}

impl BackendCursor {
    /// Location of the next record
    pub fn next_slice(&mut self) -> Result<Option<SegmentSlice>> {
        while self.file_index < self.compressed.len() {
            let path = self.compressed[self.file_index].clone();

            if self.current.is_none() {
                match File::open(&path) {
                    Ok(file) => {
                        let len = file.metadata()?.len();
                        self.current = Some((file, len, 0));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        self.file_index += 1;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let Some((file, len, position)) = self.current.as_mut() else {
                continue;
            };

            match locate_record(file, &path, *len, *position) {
                Ok(Some(slice)) => {
                    *position = slice.offset + slice.len;
                    return Ok(Some(slice));
                }
                Ok(None) => self.next_file(),
                Err(e) => match recover(&self.corruption_policy, e, SegmentKind::Compressed)? {
                    Recovery::Skip => self.next_file(),
                    Recovery::ResumeAt(offset) => *position = offset,
                },
            }
        }

        while let Some(path) = self.wal.get(self.file_index - self.compressed.len()).cloned() {
            self.file_index += 1;
            match segment_len(&path) {
                Ok(len) => {
                    return Ok(Some(SegmentSlice {
                        path,
                        offset: 0,
                        len,
                        kind: SegmentKind::Wal,
                    }))
                }
                Err(QueueError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    recover(&self.corruption_policy, e, SegmentKind::Wal)?;
                }
            }
        }

        Ok(None)
    }

    /// Skip the rest of the current compressed file
    fn next_file(&mut self) {
        self.current = None;
        self.file_index += 1;
    }
}
