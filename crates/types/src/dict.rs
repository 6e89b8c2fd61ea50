// Path: crates/types/src/dict.rs
//! Parameter and return-value dictionaries for contract calls.

use crate::codec::{decode_u32, decode_u64};
use crate::error::CodecError;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An ordered key-value dictionary. Iteration is lexicographic by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Dict(pub BTreeMap<Vec<u8>, Vec<u8>>);

impl Dict {
    /// An empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a raw value (builder style).
    pub fn with(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a raw value.
    pub fn set(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.0.insert(key.as_bytes().to_vec(), value.into());
    }

    /// Returns a raw value.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key.as_bytes()).map(Vec::as_slice)
    }

    /// Returns a required raw value.
    pub fn get_bytes(&self, key: &str) -> Result<&[u8], CodecError> {
        self.get(key)
            .ok_or_else(|| CodecError::InvalidValue(format!("missing parameter '{}'", key)))
    }

    /// Returns a required little-endian `u64`.
    pub fn get_u64(&self, key: &str) -> Result<u64, CodecError> {
        decode_u64(self.get_bytes(key)?)
    }

    /// Returns an optional little-endian `u64`, or `default` when absent.
    pub fn get_u64_or(&self, key: &str, default: u64) -> Result<u64, CodecError> {
        match self.get(key) {
            Some(v) => decode_u64(v),
            None => Ok(default),
        }
    }

    /// Returns a required little-endian `u32`.
    pub fn get_u32(&self, key: &str) -> Result<u32, CodecError> {
        decode_u32(self.get_bytes(key)?)
    }

    /// Decodes a required SCALE-encoded value.
    pub fn get_decoded<T: Decode>(&self, key: &str) -> Result<T, CodecError> {
        crate::codec::from_bytes_canonical(self.get_bytes(key)?)
    }

    /// Returns `true` if the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}
