// Path: crates/types/src/codec.rs
//! The canonical binary codec.
//!
//! Everything that contributes to a state commitment, a transaction essence or
//! a peer message is encoded with SCALE. Decoding is strict: trailing bytes are
//! rejected so a value has exactly one valid encoding.

use crate::error::CodecError;
use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
pub fn to_bytes_canonical<T: Encode>(value: &T) -> Vec<u8> {
    value.encode()
}

/// Decodes a value from its canonical byte representation, rejecting trailing data.
pub fn from_bytes_canonical<T: Decode>(bytes: &[u8]) -> Result<T, CodecError> {
    T::decode_all(&mut &*bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Reads a little-endian `u64` from an exactly 8-byte slice.
pub fn decode_u64(bytes: &[u8]) -> Result<u64, CodecError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CodecError::InvalidLength { expected: 8, got: bytes.len() })?;
    Ok(u64::from_le_bytes(arr))
}

/// Reads a little-endian `u32` from an exactly 4-byte slice.
pub fn decode_u32(bytes: &[u8]) -> Result<u32, CodecError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| CodecError::InvalidLength { expected: 4, got: bytes.len() })?;
    Ok(u32::from_le_bytes(arr))
}
