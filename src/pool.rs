//! Buffer Pool
//!
//! Reusable growable scratch buffers for encoding items and reading records.
//!
//! The pool is an explicit value: queues receive an `Arc<BufferPool>` through
//! their configuration, so several queues can share one pool or each own one.
//! Correctness never depends on the pool; a borrowed buffer may grow freely
//! and an exhausted pool simply allocates a fresh buffer.

use std::fmt;
use std::ops::{Deref, DerefMut};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Shared pool of reusable byte buffers
///
/// ## Concurrency:
/// - The free list is a bounded lock-free `ArrayQueue`
/// - `acquire`/release may be called from any thread concurrently
pub struct BufferPool {
    /// Idle buffers waiting to be reused
    free: ArrayQueue<BytesMut>,

    /// Capacity given to freshly allocated buffers
    buffer_capacity: usize,
}

impl BufferPool {
    /// Initial capacity of a new buffer
    pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

    /// Maximum number of idle buffers retained
    pub const DEFAULT_MAX_BUFFERS: usize = 1024;

    /// Buffers allocated up front
    pub const DEFAULT_PREALLOCATED: usize = 3;

    /// Create a pool retaining at most `max_buffers` idle buffers
    pub fn new(buffer_capacity: usize, max_buffers: usize, preallocated: usize) -> Self {
        let free = ArrayQueue::new(max_buffers.max(1));
        for _ in 0..preallocated.min(max_buffers) {
            let _ = free.push(BytesMut::with_capacity(buffer_capacity));
        }
        Self {
            free,
            buffer_capacity,
        }
    }

    /// Take a buffer out of the pool; it returns itself when dropped
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buffer = self
            .free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity));
        PooledBuffer {
            pool: self,
            buffer,
        }
    }

    /// Run `action` with a pooled buffer, releasing it on every exit path
    /// (including `?` returns and panics inside `action`).
    pub fn borrow<R>(&self, action: impl FnOnce(&mut BytesMut) -> R) -> R {
        let mut buffer = self.acquire();
        action(&mut buffer)
    }

    /// Number of idle buffers currently held
    pub fn available(&self) -> usize {
        self.free.len()
    }

    fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        // Pool full: let the buffer go
        let _ = self.free.push(buffer);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BUFFER_CAPACITY,
            Self::DEFAULT_MAX_BUFFERS,
            Self::DEFAULT_PREALLOCATED,
        )
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.free.len())
            .field("capacity", &self.free.capacity())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: BytesMut,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.release(buffer);
    }
}
