//! # popout
//!
//! A disk-resident FIFO queue with:
//! - One write-ahead segment file per write (or per batch)
//! - Compaction of many WAL segments into a few framed "compressed" files
//! - In-place deletion with JUMP headers and negative-length tombstones
//! - Two access modes: durable per item, or batched in memory
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │       SyncedQueue        │      │       BatchedQueue       │
//! │   (one fair lock, one    │      │  head ◄── disk ◄── tail  │
//! │    record per item)      │      │  (fair read/write locks) │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              │                                 │
//!              └───────────────┬─────────────────┘
//!                              ▼
//!              ┌───────────────────────────────┐
//!              │        StorageBackend         │
//!              │  read: compressed, then WAL   │
//!              │  write: WAL, compact on limit │
//!              └───────┬───────────────┬───────┘
//!                      │               │
//!                      ▼               ▼
//!          ┌──────────────────┐  ┌──────────────────┐
//!          │ CompressedSegs   │  │   WalSegments    │
//!          │ {name}-N.compr.. │  │  {name}-N.wal    │
//!          └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use popout::{QueueConfig, SyncedQueue};
//!
//! let config = QueueConfig::builder().name("jobs").folder("/tmp/jobs").build();
//! let queue: SyncedQueue<String> = SyncedQueue::open(config)?;
//! queue.offer("hello".to_string())?;
//! assert_eq!(queue.poll()?, Some("hello".to_string()));
//! # Ok::<(), popout::QueueError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod pool;
pub mod limit;
pub mod storage;
pub mod queue;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{QueueError, Result};
pub use config::{CorruptionAction, CorruptionPolicy, QueueConfig, SyncStrategy};
pub use codec::{Bincode, Codec};
pub use limit::{LimitAction, QueueLimit};
pub use pool::BufferPool;
pub use queue::{BatchedQueue, FileQueue, ItemHandle, SyncedQueue};
pub use storage::{SegmentKind, SegmentSlice, StorageBackend};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of popout
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
