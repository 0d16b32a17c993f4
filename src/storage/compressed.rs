//! Compressed Segments
//!
//! Merges WAL segments into larger framed files and serves their records.
//!
//! ## Compaction
//! One pass writes one file, pre-sized to
//! `min(Σ(9 + segment size) + 9, max_size)`. Segments are copied in order,
//! each behind a RECORD header, while they fit the budget; the segments left
//! over are returned to the caller for the next pass. The first segment is
//! always merged, even when it alone overflows the budget.
//!
//! ## Publication
//! ```text
//! reserve {name}-{n}.compressed (empty)
//!   → write {name}-{n}.compressed.tmp, END, fsync
//!   → rename over the reservation
//!   → caller deletes the merged WAL segments
//! ```
//! A crash at any step leaves the sources in place. An empty reservation
//! reads as exhausted; stray `.tmp` files are deleted on open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::config::{CorruptionPolicy, SyncStrategy};
use crate::error::{QueueError, Result};

use super::files::{remove_if_exists, FilesManager};
use super::header::{skip_jumps, Marker, RecordHeader, HEADER_SIZE};
use super::{read_slice, recover, ReadOutcome, Recovery, SegmentKind, SegmentSlice};

/// Compressed file suffix
pub const COMPRESSED_SUFFIX: &str = ".compressed";

/// Suffix of a compressed file still being written
const TMP_SUFFIX: &str = ".compressed.tmp";

/// Outcome of one compaction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// File written by this pass
    pub compressed: Option<PathBuf>,

    /// Sources copied into the file; safe to delete
    pub merged: Vec<PathBuf>,

    /// Sources that did not fit; pass them to the next `compress`
    pub remaining: Vec<PathBuf>,
}

/// Compressed segment store for one queue
#[derive(Debug)]
pub struct CompressedSegments {
    files: FilesManager,

    /// Size budget of one compressed file
    max_size: u64,

    sync_strategy: SyncStrategy,

    corruption_policy: CorruptionPolicy,
}

impl CompressedSegments {
    /// Open the compressed segments of queue `name` in `folder`
    pub fn open(
        folder: &Path,
        name: &str,
        max_size: u64,
        sync_strategy: SyncStrategy,
        corruption_policy: CorruptionPolicy,
    ) -> Result<Self> {
        let prefix = format!("{}-", name);
        let files = FilesManager::open(folder, &prefix, COMPRESSED_SUFFIX)?;
        remove_stale_tmp_files(folder, &prefix)?;

        Ok(Self {
            files,
            max_size,
            sync_strategy,
            corruption_policy,
        })
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Merge as many of `sources` (oldest first) as fit into one new file
    pub fn compress(&mut self, sources: &[PathBuf]) -> Result<CompactionResult> {
        if sources.is_empty() {
            return Ok(CompactionResult::default());
        }

        let mut sizes = Vec::with_capacity(sources.len());
        for source in sources {
            sizes.push(fs::metadata(source)?.len());
        }

        let needed = sizes
            .iter()
            .fold(HEADER_SIZE, |acc, size| acc.saturating_add(HEADER_SIZE + size))
            .min(self.max_size);
        let allocated = needed.saturating_sub(HEADER_SIZE);

        let target = self.files.create_next_file()?;
        let tmp = tmp_path(&target);

        let merged = match self
            .write_frames(&tmp, sources, &sizes, needed, allocated)
            .and_then(|merged| {
                fs::rename(&tmp, &target)?;
                Ok(merged)
            }) {
            Ok(merged) => merged,
            Err(e) => {
                remove_if_exists(&tmp)?;
                self.files.remove(&[target])?;
                return Err(e);
            }
        };

        tracing::debug!(
            file = %target.display(),
            merged,
            remaining = sources.len() - merged,
            "Compaction pass finished"
        );

        Ok(CompactionResult {
            compressed: Some(target),
            merged: sources[..merged].to_vec(),
            remaining: sources[merged..].to_vec(),
        })
    }

    /// Write frames into `tmp`; returns how many sources were consumed
    fn write_frames(
        &self,
        tmp: &Path,
        sources: &[PathBuf],
        sizes: &[u64],
        needed: u64,
        allocated: u64,
    ) -> Result<usize> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;
        file.set_len(needed)?;

        let mut writer = BufWriter::new(file);
        let mut position = 0u64;
        let mut frames = 0usize;
        let mut merged = 0usize;

        for (source, &size) in sources.iter().zip(sizes) {
            if size == 0 {
                // Nothing was ever written to it
                merged += 1;
                continue;
            }

            let fits = position + HEADER_SIZE + size <= allocated;
            if !fits && frames > 0 {
                break;
            }

            writer.write_all(&RecordHeader::record(size).encode())?;
            let input = File::open(source)?;
            let copied = io::copy(&mut input.take(size), &mut writer)?;
            if copied != size {
                return Err(QueueError::corrupted(
                    source,
                    copied,
                    format!("segment shrank to {} of {} bytes during compaction", copied, size),
                ));
            }

            position += HEADER_SIZE + size;
            frames += 1;
            merged += 1;
        }

        writer.write_all(&RecordHeader::end().encode())?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if self.sync_strategy == SyncStrategy::EveryWrite {
            file.sync_all()?;
        }

        Ok(merged)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Append the next record's payload to `buf`
    pub fn peek_to(&mut self, buf: &mut BytesMut) -> Result<ReadOutcome> {
        let Some(slice) = self.peek_slice()? else {
            return Ok(ReadOutcome::Exhausted);
        };
        Ok(ReadOutcome::Read(read_slice(&slice, buf)?))
    }

    /// Append the next record's payload to `buf` and consume it
    ///
    /// The file's first header becomes a JUMP past the consumed payload; the
    /// payload itself is left untouched. A file with nothing left is deleted.
    pub fn poll_to(&mut self, buf: &mut BytesMut) -> Result<ReadOutcome> {
        let Some(slice) = self.peek_slice()? else {
            return Ok(ReadOutcome::Exhausted);
        };
        let read = read_slice(&slice, buf)?;
        self.consume(&slice)?;
        Ok(ReadOutcome::Read(read))
    }

    /// Consume the record `peek_slice` returned without reading it
    pub fn consume(&mut self, slice: &SegmentSlice) -> Result<()> {
        let after = slice.offset + slice.len;
        let mut file = OpenOptions::new().read(true).write(true).open(&slice.path)?;
        let finished = match skip_jumps(&mut file, &slice.path, after) {
            Ok((header, _)) => header.marker == Marker::End,
            // Left for the next read to report
            Err(e) if e.is_corruption() => false,
            Err(e) => return Err(e),
        };

        if finished {
            drop(file);
            self.files.remove(std::slice::from_ref(&slice.path))?;
        } else {
            RecordHeader::jump(after).write_at(&mut file, 0)?;
            self.sync(&file)?;
        }
        Ok(())
    }

    /// Location of the next live record
    ///
    /// Exhausted files are deleted on the way; corrupted ones go through the
    /// corruption policy.
    pub fn peek_slice(&mut self) -> Result<Option<SegmentSlice>> {
        loop {
            let Some(path) = self.files.peek().map(Path::to_path_buf) else {
                return Ok(None);
            };

            let located = File::open(&path)
                .map_err(QueueError::from)
                .and_then(|mut file| {
                    let len = file.metadata()?.len();
                    locate_record(&mut file, &path, len, 0)
                });

            match located {
                Ok(Some(slice)) => return Ok(Some(slice)),
                Ok(None) => {
                    tracing::trace!(path = %path.display(), "Compressed file exhausted");
                    self.files.remove(&[path])?;
                }
                Err(e) => match recover(&self.corruption_policy, e, SegmentKind::Compressed)? {
                    Recovery::Skip => self.files.remove(&[path])?,
                    Recovery::ResumeAt(offset) => {
                        let mut file = OpenOptions::new().write(true).open(&path)?;
                        RecordHeader::jump(offset).write_at(&mut file, 0)?;
                        self.sync(&file)?;
                    }
                },
            }
        }
    }

    /// Remove one record in place: its RECORD header becomes a JUMP past it
    pub fn remove(&mut self, slice: &SegmentSlice) -> Result<()> {
        if slice.kind != SegmentKind::Compressed || slice.offset < HEADER_SIZE {
            return Err(QueueError::Unsupported(format!(
                "{:?} slice at {} is not a compressed record",
                slice.kind, slice.offset
            )));
        }

        let header_at = slice.offset - HEADER_SIZE;
        let mut file = OpenOptions::new().read(true).write(true).open(&slice.path)?;
        let header = RecordHeader::read_at(&mut file, &slice.path, header_at)?;
        if header != RecordHeader::record(slice.len) {
            return Err(QueueError::Unsupported(format!(
                "no live record at '{}' position {}",
                slice.path.display(),
                header_at
            )));
        }

        RecordHeader::jump(slice.offset + slice.len).write_at(&mut file, header_at)?;
        self.sync(&file)
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Delete every compressed file
    pub fn clear(&mut self) -> Result<()> {
        self.files.clear()
    }

    /// Tracked file paths, oldest first
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

    /// Sum of compressed file sizes
    pub fn disk_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.files.files() {
            total += fs::metadata(path)?.len();
        }
        Ok(total)
    }

    fn sync(&self, file: &File) -> Result<()> {
        if self.sync_strategy == SyncStrategy::EveryWrite {
            file.sync_data()?;
        }
        Ok(())
    }
}

/// Find the next RECORD at or after `from`, following jumps
///
/// `Ok(None)` means END was reached (or the file is empty).
pub(crate) fn locate_record(
    file: &mut File,
    path: &Path,
    file_len: u64,
    from: u64,
) -> Result<Option<SegmentSlice>> {
    if file_len == 0 {
        return Ok(None);
    }

    let (header, position) = skip_jumps(file, path, from)?;
    match header.marker {
        Marker::End => Ok(None),
        Marker::Record => {
            let offset = position + HEADER_SIZE;
            match offset.checked_add(header.value) {
                Some(end) if end <= file_len => Ok(Some(SegmentSlice {
                    path: path.to_path_buf(),
                    offset,
                    len: header.value,
                    kind: SegmentKind::Compressed,
                })),
                _ => Err(QueueError::corrupted(
                    path,
                    position,
                    format!("record of {} bytes overruns the file", header.value),
                )),
            }
        }
        Marker::Jump => Err(QueueError::corrupted(path, position, "unresolved jump")),
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn remove_stale_tmp_files(folder: &Path, prefix: &str) -> Result<()> {
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(prefix)?.strip_suffix(TMP_SUFFIX))
            .map(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);

        if stale && path.is_file() {
            tracing::warn!(path = %path.display(), "Removing unfinished compaction file");
            remove_if_exists(&path)?;
        }
    }
    Ok(())
}
