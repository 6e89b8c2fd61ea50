// Path: crates/types/src/block.rs
//! State updates and blocks.
//!
//! A [`StateUpdate`] is an ordered set of set/delete mutations. A [`Block`] seals
//! the mutations of one state index together with the commitment of its parent,
//! so replaying blocks from origin reproduces every committed root.

use crate::codec::{from_bytes_canonical, to_bytes_canonical};
use crate::error::CodecError;
use crate::ids::{hash_data, HashValue};
use crate::ledger::L1Commitment;
use parity_scale_codec::{Decode, Encode};
use std::collections::BTreeMap;

/// Ordered set/delete mutations. A `None` value deletes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct StateUpdate {
    mutations: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl StateUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a set.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.mutations.insert(key, Some(value));
    }

    /// Records a delete.
    pub fn del(&mut self, key: Vec<u8>) {
        self.mutations.insert(key, None);
    }

    /// The pending mutation of `key`: `Some(None)` is a pending delete, `None` means untouched.
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.mutations.get(key).map(|v| v.as_deref())
    }

    /// Applies `other` on top of this update; later mutations win.
    pub fn merge(&mut self, other: StateUpdate) {
        self.mutations.extend(other.mutations);
    }

    /// Overlays the mutations under `prefix` onto `base`, which holds committed key-value pairs.
    pub fn overlay_prefix(&self, prefix: &[u8], base: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        for (key, value) in self.mutations.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(v) => {
                    base.insert(key.clone(), v.clone());
                }
                None => {
                    base.remove(key);
                }
            }
        }
    }

    /// Iterates mutations in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)> {
        self.mutations.iter()
    }

    /// Returns `true` if there are no mutations.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// The number of mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }
}

/// The sealed mutations of one state index.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    /// The state index this block produces.
    pub block_index: u32,
    /// The state timestamp in unix nanoseconds.
    pub timestamp: u64,
    /// The commitment of the parent state. `None` only for the origin block.
    pub previous_l1_commitment: Option<L1Commitment>,
    /// The mutations.
    pub mutations: StateUpdate,
}

impl Block {
    /// Canonical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(self)
    }

    /// Parses canonical bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        from_bytes_canonical(bytes)
    }

    /// The block hash, part of the L1 commitment.
    pub fn hash(&self) -> HashValue {
        hash_data(&self.to_bytes())
    }
}
