//! Synced Queue
//!
//! Every operation round-trips through the storage backend: one item is one
//! record on disk, durable as soon as `offer` returns.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{FairMutex, FairMutexGuard};

use crate::codec::Codec;
use crate::config::{CorruptionPolicy, QueueConfig};
use crate::error::Result;
use crate::limit::QueueLimit;
use crate::pool::BufferPool;
use crate::storage::{recover, BackendCursor, SegmentKind, SegmentSlice, StorageBackend};

use super::{batch, FileQueue};

/// Disk queue persisting every item individually
///
/// ## Concurrency:
/// - `backend`: one fair lock shared by every operation
/// - `size`: atomic counter, read without locking
pub struct SyncedQueue<T> {
    backend: FairMutex<StorageBackend>,
    size: AtomicU64,
    limit: QueueLimit<T>,
    pool: Arc<BufferPool>,
    corruption_policy: CorruptionPolicy,
    _items: PhantomData<fn() -> T>,
}

impl<T: Codec> SyncedQueue<T> {
    /// Open a queue without a size limit
    pub fn open(config: QueueConfig) -> Result<Self> {
        Self::with_limit(config, QueueLimit::NoLimit)
    }

    /// Open a queue guarded by `limit`
    ///
    /// The item count is restored by scanning every record once.
    pub fn with_limit(config: QueueConfig, limit: QueueLimit<T>) -> Result<Self> {
        let backend = StorageBackend::open(&config)?;

        let mut cursor = backend.cursor();
        let mut size = 0u64;
        while cursor.next_slice()?.is_some() {
            size += 1;
        }

        tracing::info!(queue = %config.name, items = size, "Opened synced queue");

        Ok(Self {
            backend: FairMutex::new(backend),
            size: AtomicU64::new(size),
            limit,
            pool: config.buffer_pool,
            corruption_policy: config.corruption_policy,
            _items: PhantomData,
        })
    }

    /// Number of items
    pub fn len(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue an item
    pub fn offer(&self, item: T) -> Result<bool>
    where
        T: Send,
    {
        if self.limit.is_exceeded(self)? {
            self.limit.on_exceeded(item, self)?;
            return Ok(false);
        }

        let mut buf = self.pool.acquire();
        batch::put_item(&item, &mut buf)?;

        let mut backend = self.backend.lock();
        backend.append(&buf)?;
        self.size.fetch_add(1, Ordering::SeqCst);
        backend.compact_if_needed()?;
        Ok(true)
    }

    /// Remove and return the oldest item
    pub fn poll(&self) -> Result<Option<T>> {
        self.read(true)
    }

    /// Return the oldest item without removing it
    pub fn peek(&self) -> Result<Option<T>> {
        self.read(false)
    }

    /// Bytes used by segment files
    pub fn disk_size(&self) -> Result<u64> {
        self.backend.lock().disk_size()
    }

    /// Every write is already on disk
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Merge every WAL segment into compressed files
    pub fn compress(&self) -> Result<()> {
        self.backend.lock().compress()
    }

    /// Remove every item
    pub fn clear(&self) -> Result<()> {
        let mut backend = self.backend.lock();
        backend.clear()?;
        self.size.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Close the queue
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Iterate over the items, holding the queue lock until dropped
    pub fn cursor(&self) -> SyncedCursor<'_, T> {
        let backend = self.backend.lock();
        let cursor = backend.cursor();
        SyncedCursor {
            backend,
            cursor,
            queue: self,
        }
    }

    /// Run `action` with exclusive access to the backend
    pub fn with_backend<R>(&self, action: impl FnOnce(&mut StorageBackend) -> R) -> R {
        action(&mut self.backend.lock())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read(&self, remove: bool) -> Result<Option<T>> {
        let mut backend = self.backend.lock();
        let mut buf = self.pool.acquire();

        loop {
            buf.clear();
            let Some(slice) = backend.peek_slice()? else {
                return Ok(None);
            };
            backend.read_slice(&slice, &mut buf)?;

            match batch::read_item(&buf, &slice) {
                Ok(item) => {
                    if remove {
                        backend.consume(&slice)?;
                        self.size.fetch_sub(1, Ordering::SeqCst);
                    }
                    return Ok(Some(item));
                }
                Err(e) => {
                    // Undecodable items are dropped unless the policy fails
                    recover(&self.corruption_policy, e, SegmentKind::Wal)?;
                    backend.consume(&slice)?;
                    self.size.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}

impl<T: Codec + Send> FileQueue<T> for SyncedQueue<T> {
    fn offer(&self, item: T) -> Result<bool> {
        SyncedQueue::offer(self, item)
    }

    fn poll(&self) -> Result<Option<T>> {
        SyncedQueue::poll(self)
    }

    fn peek(&self) -> Result<Option<T>> {
        SyncedQueue::peek(self)
    }

    fn len(&self) -> u64 {
        SyncedQueue::len(self)
    }

    fn disk_size(&self) -> Result<u64> {
        SyncedQueue::disk_size(self)
    }

    fn flush(&self) -> Result<()> {
        SyncedQueue::flush(self)
    }

    fn compress(&self) -> Result<()> {
        SyncedQueue::compress(self)
    }
}

/// Cursor over a synced queue
///
/// Yields each item with the slice locating it; pass the slice to
/// [`SyncedCursor::remove`] to delete that item in place.
pub struct SyncedCursor<'a, T> {
    backend: FairMutexGuard<'a, StorageBackend>,
    cursor: BackendCursor,
    queue: &'a SyncedQueue<T>,
}

impl<T: Codec> SyncedCursor<'_, T> {
    /// Delete the item at `slice`
    pub fn remove(&mut self, slice: &SegmentSlice) -> Result<()> {
        self.backend.remove(slice)?;
        self.queue.size.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<T: Codec> Iterator for SyncedCursor<'_, T> {
    type Item = Result<(SegmentSlice, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let slice = match self.cursor.next_slice() {
                Ok(Some(slice)) => slice,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            let mut buf = self.queue.pool.acquire();
            if let Err(e) = self.backend.read_slice(&slice, &mut buf) {
                return Some(Err(e));
            }
            match batch::read_item(&buf, &slice) {
                Ok(item) => return Some(Ok((slice, item))),
                Err(e) => {
                    if let Err(e) = recover(&self.queue.corruption_policy, e, SegmentKind::Wal) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
