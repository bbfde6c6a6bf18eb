//! Binary encoding and decoding traits for deterministic serialization.
//!
//! All encoded data uses little-endian byte order. Types whose fields are
//! fixed-width integers and byte arrays serialize to their exact in-memory
//! file layout, which is what the ELF structures rely on.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - `usize`: encoded as `u64` for portability
//! - `bool`: single byte (0 = false, 1 = true)
//! - `Vec<T>`/`String`: 8-byte length prefix followed by elements
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by value if present
//! - Arrays `[u8; N]`: bytes copied verbatim, no length prefix

use viua_derive::Error;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and by [`SizeCounter`] to allow encoding
/// directly into the target without intermediate allocations.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity before encoding.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing was counted yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    #[error("invalid value for target type")]
    InvalidValue,
    /// Length prefix exceeds maximum allowed size.
    #[error("length prefix overflow")]
    LengthOverflow,
}

/// Trait for types that can be deserialized from binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}

/// Consumes `count` bytes from the front of the input slice.
fn take<'a>(input: &mut &'a [u8], count: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < count {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(count);
    *input = rest;
    Ok(head)
}

macro_rules! impl_codec_for_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Encode for $ty {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $ty {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = take(input, std::mem::size_of::<$ty>())?;
                    Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_codec_for_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let value = u64::decode(input)?;
        usize::try_from(value).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[u8::from(*self)]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match take(input, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = take(input, N)?;
        Ok(bytes.try_into().unwrap())
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        // An element takes at least one byte; reject lengths the input
        // cannot possibly satisfy before reserving memory for them.
        if len > input.len() {
            return Err(DecodeError::LengthOverflow);
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        let bytes = take(input, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => out.write(&[0]),
            Some(value) => {
                out.write(&[1]);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match take(input, 1)?[0] {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_roundtrip() {
        let mut out = Vec::new();
        0xdead_beefu32.encode(&mut out);
        assert_eq!(out, 0xdead_beefu32.to_le_bytes());
        assert_eq!(u32::from_bytes(&out).unwrap(), 0xdead_beef);
    }

    #[test]
    fn usize_encodes_as_u64() {
        let mut out = Vec::new();
        7usize.encode(&mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(usize::from_bytes(&out).unwrap(), 7);
    }

    #[test]
    fn array_has_no_prefix() {
        let mut out = Vec::new();
        [1u8, 2, 3].encode(&mut out);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn vec_roundtrip() {
        let values = vec![1u16, 2, 3];
        let bytes = values.to_bytes();
        assert_eq!(bytes.len(), 8 + 3 * 2);
        assert_eq!(Vec::<u16>::from_bytes(&bytes).unwrap(), values);
    }

    #[test]
    fn string_roundtrip() {
        let s = String::from("hello");
        let bytes = s.to_bytes();
        assert_eq!(String::from_bytes(&bytes).unwrap(), s);
    }

    #[test]
    fn decode_eof() {
        assert!(matches!(
            u64::from_bytes(&[0x01, 0x02]),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn decode_trailing_bytes_rejected() {
        let mut bytes = 1u8.to_bytes();
        bytes.push(0xff);
        assert!(matches!(
            u8::from_bytes(&bytes),
            Err(DecodeError::InvalidValue)
        ));
    }

    #[test]
    fn vec_length_overflow_rejected() {
        // Length prefix claims far more elements than the input holds.
        let mut bytes = Vec::new();
        u64::MAX.encode(&mut bytes);
        assert!(matches!(
            Vec::<u8>::from_bytes(&bytes),
            Err(DecodeError::LengthOverflow)
        ));
    }

    #[test]
    fn size_counter_matches_encoded_len() {
        let value = vec![String::from("a"), String::from("bc")];
        let mut counter = SizeCounter::new();
        value.encode(&mut counter);
        assert_eq!(counter.len(), value.to_bytes().len());
    }
}
