//! WAL Segments
//!
//! Append-only write-ahead segments: one file per write, no framing.
//! The whole file is the record.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::config::{CorruptionPolicy, SyncStrategy};
use crate::error::{QueueError, Result};

use super::files::FilesManager;
use super::{recover, ReadOutcome, Recovery, SegmentKind, SegmentSlice};

/// WAL segment file suffix
pub const WAL_SUFFIX: &str = ".wal";

/// Write-ahead segment store for one queue
#[derive(Debug)]
pub struct WalSegments {
    files: FilesManager,

    /// Segment count that may be kept before compaction
    max_count: usize,

    sync_strategy: SyncStrategy,

    corruption_policy: CorruptionPolicy,
}

impl WalSegments {
    /// Open the WAL segments of queue `name` in `folder`
    pub fn open(
        folder: &Path,
        name: &str,
        max_count: usize,
        sync_strategy: SyncStrategy,
        corruption_policy: CorruptionPolicy,
    ) -> Result<Self> {
        let files = FilesManager::open(folder, &format!("{}-", name), WAL_SUFFIX)?;
        Ok(Self {
            files,
            max_count,
            sync_strategy,
            corruption_policy,
        })
    }

    /// Persist `bytes` as a new segment
    pub fn write(&mut self, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.files.create_next_file()?;

        let written = OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                if self.sync_strategy == SyncStrategy::EveryWrite {
                    file.sync_all()?;
                }
                Ok(())
            });

        if let Err(e) = written {
            // Do not leave a half-written segment behind
            self.files.remove(std::slice::from_ref(&path))?;
            return Err(e.into());
        }

        tracing::trace!(path = %path.display(), bytes = bytes.len(), "Wrote WAL segment");
        Ok(path)
    }

    /// Append the oldest segment's content to `buf`
    pub fn peek_to(&mut self, buf: &mut BytesMut) -> Result<ReadOutcome> {
        self.read_oldest(buf, false)
    }

    /// Append the oldest segment's content to `buf` and delete it
    pub fn poll_to(&mut self, buf: &mut BytesMut) -> Result<ReadOutcome> {
        self.read_oldest(buf, true)
    }

    /// Slice covering the oldest readable segment
    pub fn peek_slice(&mut self) -> Result<Option<SegmentSlice>> {
        loop {
            let Some(path) = self.files.peek().map(Path::to_path_buf) else {
                return Ok(None);
            };

            match segment_len(&path) {
                Ok(len) => {
                    return Ok(Some(SegmentSlice {
                        path,
                        offset: 0,
                        len,
                        kind: SegmentKind::Wal,
                    }))
                }
                Err(e) => self.discard_or_fail(e, &path)?,
            }
        }
    }

    /// Whether compaction is due
    pub fn is_limit_exceeded(&self) -> bool {
        self.files.len() > self.max_count
    }

    /// Delete segments (usually those merged by compaction)
    pub fn remove(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.files.remove(paths)
    }

    /// Delete every segment
    pub fn clear(&mut self) -> Result<()> {
        self.files.clear()
    }

    /// Tracked segment paths, oldest first
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.files().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &FilesManager {
        &self.files
    }

    /// Sum of segment file sizes
    pub fn disk_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.files.files() {
            total += fs::metadata(path)?.len();
        }
        Ok(total)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_oldest(&mut self, buf: &mut BytesMut, remove: bool) -> Result<ReadOutcome> {
        loop {
            let Some(path) = self.files.peek().map(Path::to_path_buf) else {
                return Ok(ReadOutcome::Exhausted);
            };

            let content = match segment_len(&path).and_then(|_| Ok(fs::read(&path)?)) {
                Ok(content) => content,
                Err(e) => {
                    self.discard_or_fail(e, &path)?;
                    continue;
                }
            };

            buf.extend_from_slice(&content);
            if remove {
                self.files.remove(std::slice::from_ref(&path))?;
            }
            return Ok(ReadOutcome::Read(content.len()));
        }
    }

    /// Apply the corruption policy to a failed segment; skipping deletes it
    fn discard_or_fail(&mut self, error: QueueError, path: &Path) -> Result<()> {
        match recover(&self.corruption_policy, error, SegmentKind::Wal)? {
            Recovery::Skip | Recovery::ResumeAt(_) => {
                self.files.remove(&[path.to_path_buf()])?;
                Ok(())
            }
        }
    }
}

/// Size of a WAL segment; an empty one was never fully written
pub(crate) fn segment_len(path: &Path) -> Result<u64> {
    let len = fs::metadata(path)?.len();
    if len == 0 {
        return Err(QueueError::corrupted(path, 0, "empty WAL segment"));
    }
    Ok(len)
}
