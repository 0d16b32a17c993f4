//! Item Codecs
//!
//! Byte encode/decode contract between user items and queue records.
//!
//! ## Encodings (big-endian)
//! ```text
//! u8/i8/bool     1 byte
//! u16/i16        2 bytes
//! u32/i32/f32    4 bytes
//! u64/i64/f64    8 bytes
//! Vec<u8>        [i32 len][bytes]
//! String         [i32 len][utf-8 bytes]
//! Bincode<T>     [i32 len][bincode bytes]
//! ```
//!
//! The queue frames every encoded item with its own length, so `decode`
//! always receives exactly the bytes `encode` produced.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{QueueError, Result};

/// Byte encode/decode contract for queue items
pub trait Codec: Sized {
    /// Append the encoded item to `buf`
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;

    /// Rebuild an item from the bytes `encode` produced
    fn decode(bytes: &[u8]) -> Result<Self>;
}

// =============================================================================
// Fixed-Width Scalars
// =============================================================================

macro_rules! scalar_codec {
    ($($ty:ty => $put:ident, $width:literal),* $(,)?) => {
        $(
            impl Codec for $ty {
                fn encode(&self, buf: &mut BytesMut) -> Result<()> {
                    buf.$put(*self);
                    Ok(())
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    let raw = fixed::<$width>(bytes, stringify!($ty))?;
                    Ok(<$ty>::from_be_bytes(raw))
                }
            }
        )*
    };
}

scalar_codec! {
    u8 => put_u8, 1,
    i8 => put_i8, 1,
    u16 => put_u16, 2,
    i16 => put_i16, 2,
    u32 => put_u32, 4,
    i32 => put_i32, 4,
    u64 => put_u64, 8,
    i64 => put_i64, 8,
    f32 => put_f32, 4,
    f64 => put_f64, 8,
}

impl Codec for bool {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let [raw] = fixed::<1>(bytes, "bool")?;
        Ok(raw != 0)
    }
}

// =============================================================================
// Variable-Width Types
// =============================================================================

impl Codec for Vec<u8> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_prefixed(buf, self)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(prefixed(bytes)?.to_vec())
    }
}

impl Codec for String {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_prefixed(buf, self.as_bytes())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(prefixed(bytes)?.to_vec())
            .map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Wrapper storing any serde type through bincode
///
/// ```
/// use popout::codec::{Bincode, Codec};
/// use bytes::BytesMut;
///
/// let mut buf = BytesMut::new();
/// Bincode((1u32, "job".to_string())).encode(&mut buf).unwrap();
/// let Bincode(value) = Bincode::<(u32, String)>::decode(&buf).unwrap();
/// assert_eq!(value, (1, "job".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bincode<T>(pub T);

impl<T: Serialize + DeserializeOwned> Codec for Bincode<T> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let encoded =
            bincode::serialize(&self.0).map_err(|e| QueueError::Serialization(e.to_string()))?;
        put_prefixed(buf, &encoded)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(prefixed(bytes)?)
            .map(Bincode)
            .map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn fixed<const N: usize>(bytes: &[u8], ty: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        QueueError::Serialization(format!("{} needs {} bytes, got {}", ty, N, bytes.len()))
    })
}

fn put_prefixed(buf: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    let len = i32::try_from(bytes.len())
        .map_err(|_| QueueError::Serialization(format!("item of {} bytes is too large", bytes.len())))?;
    buf.reserve(4 + bytes.len());
    buf.put_i32(len);
    buf.put_slice(bytes);
    Ok(())
}

fn prefixed(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 4 {
        return Err(QueueError::Serialization("missing length prefix".to_string()));
    }
    let (head, body) = bytes.split_at(4);
    let len = i32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    if len < 0 || len as usize != body.len() {
        return Err(QueueError::Serialization(format!(
            "length prefix {} does not match {} bytes",
            len,
            body.len()
        )));
    }
    Ok(body)
}
