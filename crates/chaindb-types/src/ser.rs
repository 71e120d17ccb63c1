//! Value serialization plumbing.
//!
//! Records implement [`DbValue`], which is deliberately close to the wire:
//! encoding appends to a caller-supplied buffer, decoding consumes a byte
//! slice cursor. Values must tolerate trailing bytes (a record embedded in
//! a larger value consumes only what it needs) and must report an accurate
//! [`DbValue::encoded_size`].
//!
//! Variable-length counts use Bitcoin consensus varints via
//! [`bitcoin::VarInt`].

use bitcoin::consensus::encode::{deserialize_partial, serialize, VarInt};
use bytes::BufMut;
use thiserror::Error;

/// Error produced when decoding a stored key or value.
#[derive(Debug, Error)]
pub enum DeserError {
    /// The input ended before the record did.
    #[error("unexpected end of input while decoding {what}")]
    UnexpectedEnd {
        /// Which field or record ran dry.
        what: &'static str,
    },

    /// A field had a length outside its legal set.
    #[error("invalid length {got} for {what}")]
    InvalidLength {
        /// Which field or record was malformed.
        what: &'static str,
        /// The offending length.
        got: usize,
    },

    /// An enum tag byte had no corresponding variant.
    #[error("invalid tag {tag:#04x} for {what}")]
    InvalidTag {
        /// Which enum was being decoded.
        what: &'static str,
        /// The offending tag.
        tag: u8,
    },

    /// A Bitcoin wire structure embedded in the value failed to parse.
    #[error(transparent)]
    Wire(#[from] bitcoin::consensus::encode::Error),
}

/// Serialization contract for stored record values.
pub trait DbValue {
    /// The exact number of bytes [`DbValue::encode_value_to`] will append.
    fn encoded_size(&self) -> usize;

    /// Append the serialized value to `buf`.
    fn encode_value_to<B: BufMut>(&self, buf: &mut B);

    /// Serialize the value into a fresh buffer.
    fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.encode_value_to(&mut buf);
        buf
    }

    /// Decode a value from the front of `data`, advancing the cursor past
    /// the consumed bytes. Trailing bytes are left in place.
    fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError>
    where
        Self: Sized;

    /// Decode a value from an exact byte slice.
    fn decode_value_exact(mut data: &[u8]) -> Result<Self, DeserError>
    where
        Self: Sized,
    {
        let val = Self::decode_value(&mut data)?;
        if data.is_empty() {
            Ok(val)
        } else {
            Err(DeserError::InvalidLength { what: "trailing bytes", got: data.len() })
        }
    }
}

/// Split `n` bytes off the front of `data`.
pub(crate) fn take<'a>(
    data: &mut &'a [u8],
    n: usize,
    what: &'static str,
) -> Result<&'a [u8], DeserError> {
    if data.len() < n {
        return Err(DeserError::UnexpectedEnd { what });
    }
    let (head, tail) = data.split_at(n);
    *data = tail;
    Ok(head)
}

/// Read a fixed-size array off the front of `data`.
pub(crate) fn take_array<const N: usize>(
    data: &mut &[u8],
    what: &'static str,
) -> Result<[u8; N], DeserError> {
    let bytes = take(data, N, what)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub(crate) fn read_u8(data: &mut &[u8], what: &'static str) -> Result<u8, DeserError> {
    Ok(take_array::<1>(data, what)?[0])
}

pub(crate) fn read_u16(data: &mut &[u8], what: &'static str) -> Result<u16, DeserError> {
    Ok(u16::from_be_bytes(take_array(data, what)?))
}

pub(crate) fn read_u32(data: &mut &[u8], what: &'static str) -> Result<u32, DeserError> {
    Ok(u32::from_be_bytes(take_array(data, what)?))
}

pub(crate) fn read_u64(data: &mut &[u8], what: &'static str) -> Result<u64, DeserError> {
    Ok(u64::from_be_bytes(take_array(data, what)?))
}

/// Read a Bitcoin consensus varint off the front of `data`.
pub(crate) fn read_var_int(data: &mut &[u8], what: &'static str) -> Result<u64, DeserError> {
    let (vi, consumed) =
        deserialize_partial::<VarInt>(data).map_err(|_| DeserError::UnexpectedEnd { what })?;
    *data = &data[consumed..];
    Ok(vi.0)
}

/// Append a Bitcoin consensus varint to `buf`.
pub(crate) fn put_var_int<B: BufMut>(buf: &mut B, n: u64) {
    buf.put_slice(&serialize(&VarInt(n)));
}

/// The encoded size of `n` as a Bitcoin consensus varint.
pub(crate) fn var_int_size(n: u64) -> usize {
    VarInt(n).size()
}
