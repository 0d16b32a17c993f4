//! Configuration for popout queues
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::pool::BufferPool;

/// Main configuration for a queue instance
#[derive(Debug, Clone)]
pub struct QueueConfig {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Queue name, used as the segment file prefix: `{name}-{index}.wal`
    pub name: String,

    /// Default folder for both segment kinds
    pub folder: PathBuf,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// Write-ahead segment settings
    pub wal: WalConfig,

    /// Compressed segment settings
    pub compressed: CompressedConfig,

    /// fsync strategy for newly written files
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Startup / Recovery
    // -------------------------------------------------------------------------
    /// Restore the previous run's items (true) or delete them (false)
    pub restore_from_disk: bool,

    /// What to do when a segment fails to parse
    pub corruption_policy: CorruptionPolicy,

    // -------------------------------------------------------------------------
    // Batched Mode
    // -------------------------------------------------------------------------
    /// Items buffered in memory before a batch is flushed (batched mode only)
    pub batch_size: usize,

    // -------------------------------------------------------------------------
    // Shared Resources
    // -------------------------------------------------------------------------
    /// Scratch buffers for encode/decode
    pub buffer_pool: Arc<BufferPool>,
}

/// Write-ahead segment settings
#[derive(Debug, Clone, Default)]
pub struct WalConfig {
    /// Folder for `.wal` files; `None` uses [`QueueConfig::folder`]
    pub folder: Option<PathBuf>,

    /// WAL segment count that triggers compaction once exceeded (0 = default)
    pub max_count: usize,
}

/// Compressed segment settings
#[derive(Debug, Clone, Default)]
pub struct CompressedConfig {
    /// Folder for `.compressed` files; `None` uses [`QueueConfig::folder`]
    pub folder: Option<PathBuf>,

    /// Size budget of a single compressed file in bytes (0 = default)
    pub max_size_bytes: u64,
}

/// fsync strategy for segment files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync every WAL segment and compressed file before it is tracked
    EveryWrite,

    /// Leave flushing to the operating system
    OsManaged,
}

/// Decision taken for one corrupted segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionAction {
    /// Treat the segment as exhausted and delete it
    Discard,

    /// Continue scanning the compressed file at this absolute offset
    Resume(u64),

    /// Return the corruption error to the caller
    Fail,
}

/// Corruption handling policy
#[derive(Clone, Default)]
pub enum CorruptionPolicy {
    /// Drop the corrupted segment and continue with the next one
    #[default]
    Discard,

    /// Surface every corruption as an error
    Fail,

    /// Decide per error
    Custom(Arc<dyn Fn(&QueueError) -> CorruptionAction + Send + Sync>),
}

impl CorruptionPolicy {
    /// Resolve the action for a corruption error
    pub fn decide(&self, error: &QueueError) -> CorruptionAction {
        match self {
            CorruptionPolicy::Discard => CorruptionAction::Discard,
            CorruptionPolicy::Fail => CorruptionAction::Fail,
            CorruptionPolicy::Custom(handler) => handler(error),
        }
    }
}

impl fmt::Debug for CorruptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptionPolicy::Discard => f.write_str("Discard"),
            CorruptionPolicy::Fail => f.write_str("Fail"),
            CorruptionPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "queue".to_string(),
            folder: PathBuf::from("."),
            wal: WalConfig::default(),
            compressed: CompressedConfig::default(),
            sync_strategy: SyncStrategy::EveryWrite,
            restore_from_disk: true,
            corruption_policy: CorruptionPolicy::Discard,
            batch_size: QueueConfig::DEFAULT_BATCH_SIZE,
            buffer_pool: Arc::new(BufferPool::default()),
        }
    }
}

impl QueueConfig {
    /// WAL segments kept before compaction when `wal.max_count` is 0
    pub const DEFAULT_WAL_MAX_COUNT: usize = 100;

    /// Compressed file budget when `compressed.max_size_bytes` is 0
    pub const DEFAULT_COMPRESSED_MAX_SIZE: u64 = u64::MAX;

    /// Batch size used by batched queues
    pub const DEFAULT_BATCH_SIZE: usize = 1024;

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Folder holding WAL segments
    pub fn wal_folder(&self) -> &Path {
        self.wal.folder.as_deref().unwrap_or(&self.folder)
    }

    /// Folder holding compressed segments
    pub fn compressed_folder(&self) -> &Path {
        self.compressed.folder.as_deref().unwrap_or(&self.folder)
    }

    /// Effective WAL compaction threshold
    pub fn wal_max_count(&self) -> usize {
        match self.wal.max_count {
            0 => Self::DEFAULT_WAL_MAX_COUNT,
            count => count,
        }
    }

    /// Effective compressed file budget
    pub fn compressed_max_size(&self) -> u64 {
        match self.compressed.max_size_bytes {
            0 => Self::DEFAULT_COMPRESSED_MAX_SIZE,
            size => size,
        }
    }

    /// Check the settings and create the segment folders
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(QueueError::Config("queue name must not be empty".to_string()));
        }
        if name.contains(['/', '\\']) {
            return Err(QueueError::Config(format!(
                "queue name '{}' must not contain path separators",
                name
            )));
        }

        fs::create_dir_all(self.wal_folder())?;
        fs::create_dir_all(self.compressed_folder())?;
        Ok(())
    }
}

/// Builder for QueueConfig
#[derive(Default)]
pub struct ConfigBuilder {
    config: QueueConfig,
}

impl ConfigBuilder {
    /// Set the queue name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the folder used by both segment kinds
    pub fn folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.folder = path.into();
        self
    }

    /// Place WAL segments in a separate folder
    pub fn wal_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.wal.folder = Some(path.into());
        self
    }

    /// Set the WAL segment count that triggers compaction
    pub fn wal_max_count(mut self, count: usize) -> Self {
        self.config.wal.max_count = count;
        self
    }

    /// Place compressed segments in a separate folder
    pub fn compressed_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.compressed.folder = Some(path.into());
        self
    }

    /// Set the size budget of one compressed file
    pub fn compressed_max_size(mut self, bytes: u64) -> Self {
        self.config.compressed.max_size_bytes = bytes;
        self
    }

    /// Set the fsync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Restore previous state (true) or discard it (false)
    pub fn restore_from_disk(mut self, restore: bool) -> Self {
        self.config.restore_from_disk = restore;
        self
    }

    /// Set the corruption policy
    pub fn corruption_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.config.corruption_policy = policy;
        self
    }

    /// Set the batch size (batched queues)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Share a buffer pool with other queues
    pub fn buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.config.buffer_pool = pool;
        self
    }

    pub fn build(self) -> QueueConfig {
        self.config
    }
}
