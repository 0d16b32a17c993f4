//! Batched Queue
//!
//! Items are buffered in memory and written to disk one batch at a time.
//!
//! ## Layout
//! ```text
//!   poll ◄── head ◄──── backend records ◄──── tail ◄── offer
//!           (decoded     (batches on disk)    (up to batch_size,
//!            batch)                             not yet written)
//! ```
//!
//! ## Durability
//! - `offer` is durable once its batch is flushed (tail full, `flush`,
//!   `close` or drop)
//! - Loading a batch into `head` only peeks the record; the record is
//!   dropped from disk once `head` has drained
//! - On `close`/drop the entries already handed out from a partially drained
//!   batch are tombstoned on disk, so a restart resumes exactly where the
//!   queue stopped. After a crash those entries may be delivered again.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{FairMutex, FairMutexGuard};

use crate::codec::Codec;
use crate::config::{CorruptionPolicy, QueueConfig};
use crate::error::{QueueError, Result};
use crate::limit::QueueLimit;
use crate::pool::BufferPool;
use crate::storage::{recover, BackendCursor, SegmentKind, StorageBackend};

use super::{batch, FileQueue};

/// Disk queue writing items in batches
///
/// ## Concurrency:
/// - `head`: read side; taken first by poll/peek/cursor/close
/// - `write`: tail + backend; taken alone by offer/flush/compress, or after
///   `head` when a read must pull a batch from disk
/// - Both locks are fair (FIFO hand-off)
pub struct BatchedQueue<T: Codec> {
    head: FairMutex<Head<T>>,
    write: FairMutex<WriteState<T>>,
    size: AtomicU64,
    limit: QueueLimit<T>,
    batch_size: usize,
    pool: Arc<BufferPool>,
    corruption_policy: CorruptionPolicy,
    name: String,
}

/// Decoded batch being consumed
struct Head<T> {
    /// Remaining items with the offset of their length prefix in the record
    items: VecDeque<(usize, T)>,

    /// The batch's record is still the oldest record on disk
    pending: bool,

    /// Prefix offsets of entries already handed out
    consumed: Vec<usize>,
}

struct WriteState<T> {
    tail: VecDeque<T>,
    backend: StorageBackend,
}

impl<T: Codec> BatchedQueue<T> {
    /// Open a queue without a size limit
    pub fn open(config: QueueConfig) -> Result<Self> {
        Self::with_limit(config, QueueLimit::NoLimit)
    }

    /// Open a queue guarded by `limit`
    ///
    /// The item count is restored by counting the live entries of every
    /// batch on disk.
    pub fn with_limit(config: QueueConfig, limit: QueueLimit<T>) -> Result<Self> {
        if config.batch_size < 2 {
            return Err(QueueError::Config(format!(
                "batch size must be greater than 1, got {}",
                config.batch_size
            )));
        }

        let backend = StorageBackend::open(&config)?;
        let size = count_items(&backend, &config.buffer_pool, &config.corruption_policy)?;

        tracing::info!(
            queue = %config.name,
            items = size,
            batch_size = config.batch_size,
            "Opened batched queue"
        );

        Ok(Self {
            head: FairMutex::new(Head {
                items: VecDeque::new(),
                pending: false,
                consumed: Vec::new(),
            }),
            write: FairMutex::new(WriteState {
                tail: VecDeque::with_capacity(config.batch_size),
                backend,
            }),
            size: AtomicU64::new(size),
            limit,
            batch_size: config.batch_size,
            pool: config.buffer_pool,
            corruption_policy: config.corruption_policy,
            name: config.name,
        })
    }

    /// Number of items (head, disk and tail)
    pub fn len(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the buffered tail as one batch
    pub fn flush(&self) -> Result<()> {
        let mut write = self.write.lock();
        self.flush_tail(&mut write)
    }

    /// Flush, then merge every WAL segment into compressed files
    pub fn compress(&self) -> Result<()> {
        let mut write = self.write.lock();
        self.flush_tail(&mut write)?;
        write.backend.compress()
    }

    /// Bytes used by segment files
    pub fn disk_size(&self) -> Result<u64> {
        self.write.lock().backend.disk_size()
    }

    /// Remove every item, in memory and on disk
    pub fn clear(&self) -> Result<()> {
        let mut head = self.head.lock();
        let mut write = self.write.lock();

        head.items.clear();
        head.pending = false;
        head.consumed.clear();
        write.tail.clear();
        write.backend.clear()?;
        self.size.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Flush the tail and persist read progress
    pub fn close(self) -> Result<()> {
        self.persist()
    }

    /// Run `action` with exclusive access to the backend
    pub fn with_backend<R>(&self, action: impl FnOnce(&mut StorageBackend) -> R) -> R {
        action(&mut self.write.lock().backend)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn flush_tail(&self, write: &mut WriteState<T>) -> Result<()> {
        if write.tail.is_empty() {
            return Ok(());
        }

        let mut buf = self.pool.acquire();
        batch::put_batch(write.tail.iter(), &mut buf)?;
        write.backend.append(&buf)?;

        tracing::debug!(queue = %self.name, items = write.tail.len(), "Flushed batch");
        write.tail.clear();
        write.backend.compact_if_needed()
    }

    fn persist(&self) -> Result<()> {
        let mut head = self.head.lock();
        let mut write = self.write.lock();
        self.flush_tail(&mut write)?;

        if !head.pending {
            return Ok(());
        }

        if head.items.is_empty() {
            self.drop_oldest(&mut write.backend)?;
            head.pending = false;
            head.consumed.clear();
        } else if !head.consumed.is_empty() {
            let slice = write.backend.peek_slice()?.ok_or_else(|| {
                QueueError::Unsupported("batch being consumed is missing from disk".to_string())
            })?;
            for offset in head.consumed.drain(..) {
                match batch::tombstone_at(&slice.path, slice.offset + offset as u64) {
                    Ok(()) | Err(QueueError::Unsupported(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            tracing::debug!(queue = %self.name, "Persisted read progress");
        }
        Ok(())
    }

    /// Fill `head` with the next batch on disk
    ///
    /// Returns false when the backend holds no more items.
    fn load_head(&self, head: &mut Head<T>, write: &mut WriteState<T>) -> Result<bool> {
        if head.pending {
            self.drop_oldest(&mut write.backend)?;
            head.pending = false;
            head.consumed.clear();
        }

        loop {
            let Some(slice) = write.backend.peek_slice()? else {
                return Ok(false);
            };

            let mut buf = self.pool.acquire();
            write.backend.read_slice(&slice, &mut buf)?;

            match batch::read_batch::<T>(&buf, &slice) {
                Ok(items) if items.is_empty() => {
                    tracing::trace!(path = %slice.path.display(), "Dropping empty batch");
                }
                Ok(items) => {
                    head.items = items.into();
                    head.pending = true;
                    return Ok(true);
                }
                Err(e) => {
                    let lost = batch::count_live(&buf, &slice).unwrap_or(0);
                    recover(&self.corruption_policy, e, SegmentKind::Wal)?;
                    self.size.fetch_sub(lost, Ordering::SeqCst);
                }
            }

            write.backend.consume(&slice)?;
        }
    }

    fn drop_oldest(&self, backend: &mut StorageBackend) -> Result<()> {
        match backend.peek_slice()? {
            Some(slice) => backend.consume(&slice),
            None => Ok(()),
        }
    }
}

impl<T: Codec + Clone + Send> BatchedQueue<T> {
    /// Enqueue an item, flushing the tail first when it is full
    pub fn offer(&self, item: T) -> Result<bool> {
        if self.limit.is_exceeded(self)? {
            self.limit.on_exceeded(item, self)?;
            return Ok(false);
        }

        // Items that cannot be encoded must not reach the tail
        let mut buf = self.pool.acquire();
        batch::put_item(&item, &mut buf)?;
        drop(buf);

        let mut write = self.write.lock();
        if write.tail.len() >= self.batch_size {
            self.flush_tail(&mut write)?;
        }
        write.tail.push_back(item);
        self.size.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Remove and return the oldest item
    pub fn poll(&self) -> Result<Option<T>> {
        let mut head = self.head.lock();

        if head.items.is_empty() {
            let mut write = self.write.lock();
            if !self.load_head(&mut head, &mut write)? {
                let item = write.tail.pop_front();
                if item.is_some() {
                    self.size.fetch_sub(1, Ordering::SeqCst);
                }
                return Ok(item);
            }
        }

        let Some((offset, item)) = head.items.pop_front() else {
            return Ok(None);
        };
        head.consumed.push(offset);
        self.size.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(item))
    }

    /// Return the oldest item without removing it
    pub fn peek(&self) -> Result<Option<T>> {
        let mut head = self.head.lock();

        if head.items.is_empty() {
            let mut write = self.write.lock();
            if !self.load_head(&mut head, &mut write)? {
                return Ok(write.tail.front().cloned());
            }
        }

        Ok(head.items.front().map(|(_, item)| item.clone()))
    }

    /// Iterate over the items, holding both queue locks until dropped
    pub fn cursor(&self) -> BatchedCursor<'_, T> {
        let head = self.head.lock();
        let write = self.write.lock();
        let disk = write.backend.cursor();
        let skip_pending = head.pending;

        BatchedCursor {
            head,
            write,
            queue: self,
            stage: Stage::Head(0),
            disk,
            skip_pending,
            batch: VecDeque::new(),
            batch_path: PathBuf::new(),
            head_seen: 0,
            tail_seen: 0,
            removed_head: BTreeSet::new(),
            removed_tail: BTreeSet::new(),
        }
    }
}

impl<T: Codec> Drop for BatchedQueue<T> {
    fn drop(&mut self) {
        if let Err(e) = self.persist() {
            tracing::warn!(queue = %self.name, error = %e, "Failed to persist queue on drop");
        }
    }
}

impl<T: Codec + Clone + Send> FileQueue<T> for BatchedQueue<T> {
    fn offer(&self, item: T) -> Result<bool> {
        BatchedQueue::offer(self, item)
    }

    fn poll(&self) -> Result<Option<T>> {
        BatchedQueue::poll(self)
    }

    fn peek(&self) -> Result<Option<T>> {
        BatchedQueue::peek(self)
    }

    fn len(&self) -> u64 {
        BatchedQueue::len(self)
    }

    fn disk_size(&self) -> Result<u64> {
        BatchedQueue::disk_size(self)
    }

    fn flush(&self) -> Result<()> {
        BatchedQueue::flush(self)
    }

    fn compress(&self) -> Result<()> {
        BatchedQueue::compress(self)
    }
}

/// Live entries across every batch on disk
fn count_items(
    backend: &StorageBackend,
    pool: &BufferPool,
    policy: &CorruptionPolicy,
) -> Result<u64> {
    let mut cursor = backend.cursor();
    let mut total = 0;
    let mut buf = pool.acquire();

    while let Some(slice) = cursor.next_slice()? {
        buf.clear();
        backend.read_slice(&slice, &mut buf)?;
        match batch::count_live(&buf, &slice) {
            Ok(live) => total += live,
            Err(e) => {
                recover(policy, e, SegmentKind::Wal)?;
            }
        }
    }
    Ok(total)
}

// =============================================================================
// Cursor
// =============================================================================

/// Location of an item yielded by [`BatchedCursor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemHandle {
    /// n-th item of the in-memory head
    Head(usize),

    /// Entry on disk; `offset` is the position of its length prefix
    Disk { path: PathBuf, offset: u64 },

    /// n-th item of the in-memory tail
    Tail(usize),
}

enum Stage {
    Head(usize),
    Disk,
    Tail(usize),
    Done,
}

/// Cursor over a batched queue: head, then disk, then tail
pub struct BatchedCursor<'a, T: Codec> {
    head: FairMutexGuard<'a, Head<T>>,
    write: FairMutexGuard<'a, WriteState<T>>,
    queue: &'a BatchedQueue<T>,
    stage: Stage,

    disk: BackendCursor,

    /// First disk record backs `head`; its items were already yielded
    skip_pending: bool,

    /// Decoded entries of the current disk record
    batch: VecDeque<(u64, T)>,
    batch_path: PathBuf,

    /// Items yielded so far from head and tail
    head_seen: usize,
    tail_seen: usize,

    /// Indices removed through this cursor
    removed_head: BTreeSet<usize>,
    removed_tail: BTreeSet<usize>,
}

impl<T: Codec> BatchedCursor<'_, T> {
    /// Delete the item behind `handle`
    ///
    /// In-memory items are removed outright; disk entries are tombstoned by
    /// negating their length prefix.
    pub fn remove(&mut self, handle: &ItemHandle) -> Result<()> {
        match handle {
            ItemHandle::Head(index) => {
                let actual = actual_index(&self.removed_head, *index, self.head_seen)?;
                let (offset, _) = self
                    .head
                    .items
                    .remove(actual)
                    .ok_or_else(|| not_yielded(handle))?;
                self.head.consumed.push(offset);
                self.removed_head.insert(*index);
            }
            ItemHandle::Disk { path, offset } => batch::tombstone_at(path, *offset)?,
            ItemHandle::Tail(index) => {
                let actual = actual_index(&self.removed_tail, *index, self.tail_seen)?;
                self.write.tail.remove(actual).ok_or_else(|| not_yielded(handle))?;
                self.removed_tail.insert(*index);
            }
        }

        self.queue.size.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_disk(&mut self) -> Option<Result<(ItemHandle, T)>> {
        loop {
            if let Some((offset, item)) = self.batch.pop_front() {
                let handle = ItemHandle::Disk {
                    path: self.batch_path.clone(),
                    offset,
                };
                return Some(Ok((handle, item)));
            }

            let slice = match self.disk.next_slice() {
                Ok(Some(slice)) => slice,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            if std::mem::take(&mut self.skip_pending) {
                continue;
            }

            let mut buf = self.queue.pool.acquire();
            if let Err(e) = self.write.backend.read_slice(&slice, &mut buf) {
                return Some(Err(e));
            }
            match batch::read_batch::<T>(&buf, &slice) {
                Ok(items) => {
                    self.batch = items
                        .into_iter()
                        .map(|(offset, item)| (slice.offset + offset as u64, item))
                        .collect();
                    self.batch_path = slice.path;
                }
                Err(e) => {
                    if let Err(e) = recover(&self.queue.corruption_policy, e, SegmentKind::Wal) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

impl<T: Codec + Clone> Iterator for BatchedCursor<'_, T> {
    type Item = Result<(ItemHandle, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stage {
                Stage::Head(index) => {
                    let actual = index - self.removed_head.len();
                    match self.head.items.get(actual) {
                        Some((_, item)) => {
                            self.stage = Stage::Head(index + 1);
                            self.head_seen = index + 1;
                            return Some(Ok((ItemHandle::Head(index), item.clone())));
                        }
                        None => self.stage = Stage::Disk,
                    }
                }
                Stage::Disk => match self.next_disk() {
                    Some(Err(e)) => {
                        self.stage = Stage::Done;
                        return Some(Err(e));
                    }
                    Some(item) => return Some(item),
                    None => self.stage = Stage::Tail(0),
                },
                Stage::Tail(index) => {
                    let actual = index - self.removed_tail.len();
                    match self.write.tail.get(actual) {
                        Some(item) => {
                            self.stage = Stage::Tail(index + 1);
                            self.tail_seen = index + 1;
                            return Some(Ok((ItemHandle::Tail(index), item.clone())));
                        }
                        None => self.stage = Stage::Done,
                    }
                }
                Stage::Done => return None,
            }
        }
    }
}

/// Map an index as yielded to the current position, given earlier removals
fn actual_index(removed: &BTreeSet<usize>, index: usize, seen: usize) -> Result<usize> {
    if index >= seen {
        return Err(QueueError::Unsupported(format!(
            "item {} has not been yielded yet",
            index
        )));
    }
    if removed.contains(&index) {
        return Err(QueueError::Unsupported(format!(
            "item {} was already removed",
            index
        )));
    }
    Ok(index - removed.range(..index).count())
}

fn not_yielded(handle: &ItemHandle) -> QueueError {
    QueueError::Unsupported(format!("{:?} does not refer to a yielded item", handle))
}
