// Path: crates/api/src/state/overlay.rs

//! A copy-on-write state overlay.

use crate::state::{StateAccess, StateReader};
use kestrel_types::block::StateUpdate;
use kestrel_types::error::StateError;
use std::collections::BTreeMap;

/// An in-memory, copy-on-write overlay for any [`StateReader`].
///
/// Reads are first checked against the local `writes` cache. If a key is not
/// found, the read is passed through to the underlying `base` state.
/// All writes are captured in the local cache and do not affect the `base` state.
///
/// Cloning an overlay snapshots its write set; restoring the clone rolls back
/// every write made after the snapshot.
#[derive(Clone)]
pub struct StateOverlay<'a> {
    base: &'a dyn StateReader,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> StateOverlay<'a> {
    /// Creates a new, empty overlay on top of a base state reader.
    pub fn new(base: &'a dyn StateReader) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// The underlying reader.
    pub fn base(&self) -> &'a dyn StateReader {
        self.base
    }

    /// Returns `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Consumes the overlay and returns its writes as an ordered state update.
    pub fn into_state_update(self) -> StateUpdate {
        let mut update = StateUpdate::new();
        for (key, value) in self.writes {
            match value {
                Some(v) => update.set(key, v),
                None => update.del(key),
            }
        }
        update
    }
}

impl<'a> StateReader for StateOverlay<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(value_opt) = self.writes.get(key) {
            Ok(value_opt.clone())
        } else {
            self.base.get(key)
        }
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.prefix_scan(prefix)?.into_iter().collect();

        for (key, value_opt) in self.writes.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value_opt {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl<'a> StateAccess for StateOverlay<'a> {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StateError> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapState(BTreeMap<Vec<u8>, Vec<u8>>);

    impl StateReader for MapState {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
            Ok(self.0.get(key).cloned())
        }
        fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
            Ok(self
                .0
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    fn base() -> MapState {
        let mut m = BTreeMap::new();
        m.insert(b"a1".to_vec(), b"x".to_vec());
        m.insert(b"a2".to_vec(), b"y".to_vec());
        m.insert(b"b1".to_vec(), b"z".to_vec());
        MapState(m)
    }

    #[test]
    fn reads_fall_through_and_writes_shadow() {
        let b = base();
        let mut overlay = StateOverlay::new(&b);
        assert_eq!(overlay.get(b"a1").unwrap(), Some(b"x".to_vec()));
        overlay.insert(b"a1", b"new").unwrap();
        overlay.delete(b"a2").unwrap();
        assert_eq!(overlay.get(b"a1").unwrap(), Some(b"new".to_vec()));
        assert_eq!(overlay.get(b"a2").unwrap(), None);
        assert_eq!(b.get(b"a1").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn prefix_scan_merges_in_key_order() {
        let b = base();
        let mut overlay = StateOverlay::new(&b);
        overlay.insert(b"a0", b"w").unwrap();
        overlay.delete(b"a2").unwrap();
        overlay.insert(b"b2", b"q").unwrap();
        let keys: Vec<Vec<u8>> = overlay
            .prefix_scan(b"a")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a0".to_vec(), b"a1".to_vec()]);
    }

    #[test]
    fn snapshot_restores_writes() {
        let b = base();
        let mut overlay = StateOverlay::new(&b);
        overlay.insert(b"k", b"1").unwrap();
        let snapshot = overlay.clone();
        overlay.insert(b"k", b"2").unwrap();
        overlay.insert(b"j", b"3").unwrap();
        overlay = snapshot;
        assert_eq!(overlay.get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(overlay.get(b"j").unwrap(), None);
        let update = overlay.into_state_update();
        assert_eq!(update.len(), 1);
    }
}
