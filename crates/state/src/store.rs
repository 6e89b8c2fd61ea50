// Path: crates/state/src/store.rs
//! Committed state versions of one chain.

use crate::virtual_state::VirtualState;
use kestrel_types::error::StateError;
use kestrel_types::ids::HashValue;
use std::collections::{BTreeMap, HashMap};

/// Committed states indexed by block index and by root.
///
/// Several indexes may share one root (a rotation does not change the state),
/// so roots are reference counted and dropped with their last index.
#[derive(Debug, Default)]
pub struct StateStore {
    versions_by_index: BTreeMap<u32, HashValue>,
    root_refcount: HashMap<HashValue, u32>,
    states: HashMap<HashValue, VirtualState>,
}

impl StateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a committed state under its block index.
    pub fn commit(&mut self, state: VirtualState) -> Result<HashValue, StateError> {
        let index = state.block_index()?;
        let root = state.root();
        match self.versions_by_index.insert(index, root) {
            Some(prev) if prev == root => return Ok(root),
            Some(prev) => self.decrement_refcount(prev),
            None => {}
        }
        let count = self.root_refcount.entry(root).or_insert(0);
        if *count == 0 {
            self.states.insert(root, state);
        }
        *count += 1;
        Ok(root)
    }

    fn decrement_refcount(&mut self, root: HashValue) {
        if let Some(c) = self.root_refcount.get_mut(&root) {
            *c = c.saturating_sub(1);
            if *c == 0 {
                self.root_refcount.remove(&root);
                self.states.remove(&root);
            }
        }
    }

    /// The state committed at `index`.
    pub fn state_at(&self, index: u32) -> Option<&VirtualState> {
        self.versions_by_index
            .get(&index)
            .and_then(|root| self.states.get(root))
    }

    /// The state with the given root.
    pub fn state_by_root(&self, root: &HashValue) -> Option<&VirtualState> {
        self.states.get(root)
    }

    /// The highest committed state.
    pub fn latest(&self) -> Option<&VirtualState> {
        self.versions_by_index
            .values()
            .next_back()
            .and_then(|root| self.states.get(root))
    }

    /// The highest committed index.
    pub fn latest_index(&self) -> Option<u32> {
        self.versions_by_index.keys().next_back().copied()
    }

    /// Returns `true` if a state with this root is retained.
    pub fn contains_root(&self, root: &HashValue) -> bool {
        self.states.contains_key(root)
    }

    /// Drops every version strictly below `cutoff`. Returns the number dropped.
    pub fn prune_below(&mut self, cutoff: u32) -> usize {
        let to_prune: Vec<u32> = self
            .versions_by_index
            .range(..cutoff)
            .map(|(i, _)| *i)
            .collect();
        for index in &to_prune {
            if let Some(root) = self.versions_by_index.remove(index) {
                self.decrement_refcount(root);
            }
        }
        to_prune.len()
    }

    /// Number of retained versions.
    pub fn len(&self) -> usize {
        self.versions_by_index.len()
    }

    /// Returns `true` if nothing is committed.
    pub fn is_empty(&self) -> bool {
        self.versions_by_index.is_empty()
    }
}
