//! Record Header
//!
//! The 9-byte frame header used inside compressed segments.
//!
//! ## Layout
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Marker (1) │     Value (8, BE)        │
//! └────────────┴──────────────────────────┘
//!
//! RECORD (1)  value = payload length (> 0), payload follows
//! JUMP   (2)  value = absolute offset to continue at (> header position)
//! END    (4)  value = 0, no more frames
//! ```
//!
//! Removing a record never touches its payload: its RECORD header is
//! overwritten in place with a JUMP past the payload.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{QueueError, Result};

/// Size of an encoded header in bytes
pub const HEADER_SIZE: u64 = 9;

/// Frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Record,
    Jump,
    End,
}

impl Marker {
    pub fn as_byte(self) -> u8 {
        match self {
            Marker::Record => 1,
            Marker::Jump => 2,
            Marker::End => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Marker::Record),
            2 => Some(Marker::Jump),
            4 => Some(Marker::End),
            _ => None,
        }
    }
}

/// A decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub marker: Marker,
    pub value: u64,
}

impl RecordHeader {
    pub fn record(len: u64) -> Self {
        Self {
            marker: Marker::Record,
            value: len,
        }
    }

    pub fn jump(target: u64) -> Self {
        Self {
            marker: Marker::Jump,
            value: target,
        }
    }

    pub fn end() -> Self {
        Self {
            marker: Marker::End,
            value: 0,
        }
    }

    /// Encode to the on-disk representation
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes[0] = self.marker.as_byte();
        bytes[1..].copy_from_slice(&self.value.to_be_bytes());
        bytes
    }

    /// Decode and validate a header read at `offset` of `path`
    pub fn decode(bytes: &[u8; HEADER_SIZE as usize], path: &Path, offset: u64) -> Result<Self> {
        let marker = Marker::from_byte(bytes[0]).ok_or_else(|| {
            QueueError::corrupted(path, offset, format!("undefined marker {}", bytes[0]))
        })?;

        let mut value = [0u8; 8];
        value.copy_from_slice(&bytes[1..]);
        let header = Self {
            marker,
            value: u64::from_be_bytes(value),
        };

        match header.marker {
            Marker::Record | Marker::Jump if header.value == 0 => Err(QueueError::corrupted(
                path,
                offset,
                format!("{:?} header with zero value", header.marker),
            )),
            Marker::End if header.value != 0 => Err(QueueError::corrupted(
                path,
                offset,
                format!("END header with value {}", header.value),
            )),
            _ => Ok(header),
        }
    }

    /// Read the header stored at `offset`
    pub fn read_at(file: &mut File, path: &Path, offset: u64) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut bytes)
            .map_err(|e| QueueError::from_read(e, path, offset))?;
        Self::decode(&bytes, path, offset)
    }

    /// Overwrite the 9 bytes at `offset` with this header
    pub fn write_at(&self, file: &mut File, offset: u64) -> Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&self.encode())?;
        Ok(())
    }
}

/// Follow JUMP chains starting at `offset`
///
/// Returns the first RECORD or END header and the position it was read
/// from. A jump that does not move strictly forward is corruption.
pub fn skip_jumps(file: &mut File, path: &Path, offset: u64) -> Result<(RecordHeader, u64)> {
    let mut position = offset;
    loop {
        let header = RecordHeader::read_at(file, path, position)?;
        if header.marker != Marker::Jump {
            return Ok((header, position));
        }
        if header.value <= position {
            return Err(QueueError::corrupted(
                path,
                position,
                format!("jump to {} does not move forward", header.value),
            ));
        }
        position = header.value;
    }
}
