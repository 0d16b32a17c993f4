//! Queue Module
//!
//! The two queue engines built on [`StorageBackend`](crate::storage::StorageBackend).
//!
//! ## Modes
//! ```text
//!            SyncedQueue                         BatchedQueue
//!   offer ──► [len][item] ──► WAL        offer ──► tail (memory, batch_size)
//!   poll  ◄── backend record               │ full / flush()
//!                                          ▼
//!   one item = one record                [count][len][item]... ──► WAL
//!   every call takes one fair lock       poll ◄── head ◄── backend ◄── tail
//! ```
//!
//! Both implement [`FileQueue`], the object-safe surface that limit
//! callbacks receive.

mod batch;
mod batched;
mod synced;

pub use batched::{BatchedCursor, BatchedQueue, ItemHandle};
pub use synced::{SyncedCursor, SyncedQueue};

use crate::error::Result;

/// Common surface of every disk-backed queue
pub trait FileQueue<T>: Send + Sync {
    /// Enqueue an item
    ///
    /// Returns `Ok(false)` when the queue limit rejected the item without
    /// raising an error (drop or custom action).
    fn offer(&self, item: T) -> Result<bool>;

    /// Remove and return the oldest item
    fn poll(&self) -> Result<Option<T>>;

    /// Return the oldest item without removing it
    fn peek(&self) -> Result<Option<T>>;

    /// Number of items in the queue
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes occupied by all tracked segment files
    fn disk_size(&self) -> Result<u64>;

    /// Persist buffered items
    fn flush(&self) -> Result<()>;

    /// Merge every WAL segment into compressed files now
    fn compress(&self) -> Result<()>;
}
