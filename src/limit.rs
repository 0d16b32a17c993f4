//! Queue Limits
//!
//! Admission control evaluated before every enqueue.

use std::fmt;
use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::queue::FileQueue;

/// Callback run with a rejected item and the queue that rejected it
pub type LimitHandler<T> = Arc<dyn Fn(T, &dyn FileQueue<T>) -> Result<()> + Send + Sync>;

/// Bound on a queue's size
pub enum QueueLimit<T> {
    /// Every item is admitted
    NoLimit,

    /// At most `length` items
    MaxLength { length: u64, action: LimitAction<T> },

    /// At most `bytes` bytes of segment files
    MaxDiskBytes { bytes: u64, action: LimitAction<T> },
}

/// What happens to an item offered to a full queue
pub enum LimitAction<T> {
    /// Silently drop the item
    Drop,

    /// Fail the offer with `QueueError::LimitExceeded`
    Reject,

    /// Hand the item to a callback (which may poll the queue to make room)
    Custom(LimitHandler<T>),
}

impl<T> QueueLimit<T> {
    /// Bound on item count
    pub fn max_length(length: u64, action: LimitAction<T>) -> Self {
        QueueLimit::MaxLength { length, action }
    }

    /// Bound on bytes on disk
    pub fn max_disk_bytes(bytes: u64, action: LimitAction<T>) -> Self {
        QueueLimit::MaxDiskBytes { bytes, action }
    }

    /// Whether one more item would exceed the bound
    pub fn is_exceeded(&self, queue: &dyn FileQueue<T>) -> Result<bool> {
        match self {
            QueueLimit::NoLimit => Ok(false),
            QueueLimit::MaxLength { length, .. } => Ok(queue.len() >= *length),
            QueueLimit::MaxDiskBytes { bytes, .. } => Ok(queue.disk_size()? >= *bytes),
        }
    }

    /// Run the configured action for a rejected item
    pub fn on_exceeded(&self, item: T, queue: &dyn FileQueue<T>) -> Result<()> {
        let action = match self {
            QueueLimit::NoLimit => {
                return Err(QueueError::Unsupported(
                    "NoLimit is never exceeded".to_string(),
                ))
            }
            QueueLimit::MaxLength { action, .. } | QueueLimit::MaxDiskBytes { action, .. } => {
                action
            }
        };

        match action {
            LimitAction::Drop => {
                tracing::debug!(limit = %self, "Dropping item offered to a full queue");
                Ok(())
            }
            LimitAction::Reject => Err(QueueError::LimitExceeded {
                limit: self.to_string(),
            }),
            LimitAction::Custom(handler) => handler(item, queue),
        }
    }
}

impl<T> Default for QueueLimit<T> {
    fn default() -> Self {
        QueueLimit::NoLimit
    }
}

impl<T> Clone for LimitAction<T> {
    fn clone(&self) -> Self {
        match self {
            LimitAction::Drop => LimitAction::Drop,
            LimitAction::Reject => LimitAction::Reject,
            LimitAction::Custom(handler) => LimitAction::Custom(Arc::clone(handler)),
        }
    }
}

impl<T> Clone for QueueLimit<T> {
    fn clone(&self) -> Self {
        match self {
            QueueLimit::NoLimit => QueueLimit::NoLimit,
            QueueLimit::MaxLength { length, action } => QueueLimit::MaxLength {
                length: *length,
                action: action.clone(),
            },
            QueueLimit::MaxDiskBytes { bytes, action } => QueueLimit::MaxDiskBytes {
                bytes: *bytes,
                action: action.clone(),
            },
        }
    }
}

impl<T> fmt::Display for QueueLimit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueLimit::NoLimit => write!(f, "no limit"),
            QueueLimit::MaxLength { length, .. } => write!(f, "max length {}", length),
            QueueLimit::MaxDiskBytes { bytes, .. } => write!(f, "max disk size {} bytes", bytes),
        }
    }
}

impl<T> fmt::Debug for LimitAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitAction::Drop => f.write_str("Drop"),
            LimitAction::Reject => f.write_str("Reject"),
            LimitAction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl<T> fmt::Debug for QueueLimit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueLimit::NoLimit => f.write_str("NoLimit"),
            QueueLimit::MaxLength { length, action } => f
                .debug_struct("MaxLength")
                .field("length", length)
                .field("action", action)
                .finish(),
            QueueLimit::MaxDiskBytes { bytes, action } => f
                .debug_struct("MaxDiskBytes")
                .field("bytes", bytes)
                .field("action", action)
                .finish(),
        }
    }
}
