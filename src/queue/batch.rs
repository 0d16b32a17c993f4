//! Record Layouts
//!
//! Item framing shared by both queue modes.
//!
//! ```text
//! synced record   [len: i32][item bytes]
//! batch record    [count: i32] ([len: i32][item bytes])*
//!                 len < 0 → tombstone, skip |len| bytes
//! ```

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{BufMut, BytesMut};

use crate::codec::Codec;
use crate::error::{QueueError, Result};
use crate::storage::SegmentSlice;

/// Size of the count and length prefixes
pub(crate) const PREFIX_SIZE: usize = 4;

/// Append `[len][item]` to `buf`
pub(crate) fn put_item<T: Codec>(item: &T, buf: &mut BytesMut) -> Result<()> {
    let at = buf.len();
    buf.put_i32(0);
    item.encode(buf)?;

    let len = buf.len() - at - PREFIX_SIZE;
    if len == 0 {
        buf.truncate(at);
        return Err(QueueError::Serialization("item encoded to zero bytes".to_string()));
    }
    let len = i32::try_from(len).map_err(|_| {
        buf.truncate(at);
        QueueError::Serialization(format!("item of {} bytes is too large", len))
    })?;

    buf[at..at + PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Append a whole batch record to `buf`
pub(crate) fn put_batch<'a, T: Codec + 'a>(
    items: impl ExactSizeIterator<Item = &'a T>,
    buf: &mut BytesMut,
) -> Result<()> {
    let count = i32::try_from(items.len())
        .map_err(|_| QueueError::Serialization("batch holds too many items".to_string()))?;
    buf.put_i32(count);
    for item in items {
        put_item(item, buf)?;
    }
    Ok(())
}

/// Decode a synced record
pub(crate) fn read_item<T: Codec>(record: &[u8], slice: &SegmentSlice) -> Result<T> {
    let len = read_prefix(record, 0, slice)?;
    if len <= 0 || PREFIX_SIZE + len as usize != record.len() {
        return Err(corrupted(slice, 0, format!("item length {} in a {}-byte record", len, record.len())));
    }
    decode(&record[PREFIX_SIZE..], slice, 0)
}

/// Decode the live entries of a batch record
///
/// Each item comes with the offset of its length prefix inside the record.
pub(crate) fn read_batch<T: Codec>(record: &[u8], slice: &SegmentSlice) -> Result<Vec<(usize, T)>> {
    let mut items = Vec::new();
    walk(record, slice, |offset, bytes| {
        items.push((offset, decode(bytes, slice, offset)?));
        Ok(())
    })?;
    Ok(items)
}

/// Number of live entries in a batch record
pub(crate) fn count_live(record: &[u8], slice: &SegmentSlice) -> Result<u64> {
    let mut live = 0;
    walk(record, slice, |_, _| {
        live += 1;
        Ok(())
    })?;
    Ok(live)
}

/// Tombstone the entry whose length prefix sits at `offset` of `path`
///
/// Only the sign of the length changes; the item bytes stay as they are.
pub(crate) fn tombstone_at(path: &Path, offset: u64) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut prefix = [0u8; PREFIX_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut prefix)
        .map_err(|e| QueueError::from_read(e, path, offset))?;

    let len = i32::from_be_bytes(prefix);
    if len <= 0 {
        return Err(QueueError::Unsupported(format!(
            "item at '{}' position {} is already removed",
            path.display(),
            offset
        )));
    }

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&(-len).to_be_bytes())?;
    Ok(())
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Visit every live entry as (prefix offset, item bytes)
fn walk(
    record: &[u8],
    slice: &SegmentSlice,
    mut visit: impl FnMut(usize, &[u8]) -> Result<()>,
) -> Result<()> {
    let count = read_prefix(record, 0, slice)?;
    if count < 0 {
        return Err(corrupted(slice, 0, format!("negative item count {}", count)));
    }

    let mut position = PREFIX_SIZE;
    for _ in 0..count {
        let len = read_prefix(record, position, slice)?;
        let body = position + PREFIX_SIZE;
        let end = body + len.unsigned_abs() as usize;
        if end > record.len() {
            return Err(corrupted(slice, position, format!("item of {} bytes overruns the batch", len)));
        }
        if len > 0 {
            visit(position, &record[body..end])?;
        }
        position = end;
    }

    if position != record.len() {
        return Err(corrupted(
            slice,
            position,
            format!("{} trailing bytes after {} items", record.len() - position, count),
        ));
    }
    Ok(())
}

fn read_prefix(record: &[u8], position: usize, slice: &SegmentSlice) -> Result<i32> {
    record
        .get(position..position + PREFIX_SIZE)
        .map(|bytes| i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .ok_or_else(|| corrupted(slice, position, "truncated length prefix"))
}

fn decode<T: Codec>(bytes: &[u8], slice: &SegmentSlice, position: usize) -> Result<T> {
    T::decode(bytes).map_err(|e| corrupted(slice, position, format!("undecodable item: {}", e)))
}

fn corrupted(slice: &SegmentSlice, position: usize, reason: impl Into<String>) -> QueueError {
    QueueError::corrupted(&slice.path, slice.offset + position as u64, reason)
}
