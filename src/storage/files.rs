//! Files Manager
//!
//! Tracks the ordered set of segment files sharing one name pattern.
//!
//! ## Responsibilities
//! - Discover existing `{prefix}{index}{suffix}` files on startup
//! - Hand out strictly increasing indices for new files
//! - Keep tracked files ordered by numeric index (not by string order)
//! - Delete files and stop tracking them

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{QueueError, Result};

/// Ordered segment files of one kind for one queue
#[derive(Debug)]
pub struct FilesManager {
    /// Directory holding the files
    folder: PathBuf,

    /// File name prefix, `{name}-`
    prefix: String,

    /// File name suffix, `.wal` or `.compressed`
    suffix: String,

    /// Tracked files, oldest (lowest index) first
    files: VecDeque<PathBuf>,

    /// Next index to try when creating a file
    next_index: u64,
}

impl FilesManager {
    /// Scan `folder` for matching files
    ///
    /// The next index is `max + 1`, or 0 if nothing matched.
    pub fn open(folder: &Path, prefix: &str, suffix: &str) -> Result<Self> {
        fs::create_dir_all(folder)?;

        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() {
                if let Some(index) = parse_index(&path, prefix, suffix) {
                    found.push((index, path));
                }
            }
        }

        found.sort_by_key(|(index, _)| *index);
        let next_index = found.last().map(|(index, _)| index + 1).unwrap_or(0);

        Ok(Self {
            folder: folder.to_path_buf(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            files: found.into_iter().map(|(_, path)| path).collect(),
            next_index,
        })
    }

    /// Create an empty file with the next free index and track it
    ///
    /// Indices already taken on disk are skipped, so the returned path never
    /// existed before this call.
    pub fn create_next_file(&mut self) -> Result<PathBuf> {
        loop {
            let path = self.path_for(self.next_index);
            self.next_index += 1;

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "Created segment file");
                    self.files.push_back(path.clone());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Oldest tracked file
    pub fn peek(&self) -> Option<&Path> {
        self.files.front().map(PathBuf::as_path)
    }

    /// Stop tracking the oldest file (the file itself is left alone)
    pub fn poll(&mut self) -> Option<PathBuf> {
        self.files.pop_front()
    }

    /// Delete files if present and stop tracking them
    pub fn remove(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            remove_if_exists(path)?;
        }
        self.files.retain(|tracked| !paths.contains(tracked));
        Ok(())
    }

    /// Delete every tracked file and restart numbering at 0
    pub fn clear(&mut self) -> Result<()> {
        while let Some(path) = self.files.pop_front() {
            remove_if_exists(&path)?;
        }
        self.next_index = 0;
        Ok(())
    }

    /// Numeric index encoded in a file name
    pub fn index_of(&self, path: &Path) -> Result<u64> {
        parse_index(path, &self.prefix, &self.suffix)
            .ok_or_else(|| QueueError::InvalidName(path.to_path_buf()))
    }

    /// Path of the file with `index`
    pub fn path_for(&self, index: u64) -> PathBuf {
        self.folder
            .join(format!("{}{}{}", self.prefix, index, self.suffix))
    }

    /// Tracked files, oldest first
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

/// Delete a file; a missing file is not an error
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// "queue-42.wal" with prefix "queue-" and suffix ".wal" → Some(42)
fn parse_index(path: &Path, prefix: &str, suffix: &str) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
