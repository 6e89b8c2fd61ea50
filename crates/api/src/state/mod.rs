// Path: crates/api/src/state/mod.rs
//! Core traits for state access: [`StateReader`] and [`StateAccess`].
//!
//! Keys are raw bytes composed as `contract_hname || partition_key`. Every
//! scan returns pairs sorted lexicographically by key, which the VM relies on
//! whenever an iteration order can influence a commitment.

use kestrel_types::error::StateError;

mod overlay;

pub use overlay::*;

/// Read-only access to a key-value state.
///
/// Implementations backed by an optimistic baseline return
/// [`StateError::StateInvalidated`] once the baseline is stale.
pub trait StateReader: Send + Sync {
    /// Gets a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;

    /// Returns every pair whose key starts with `prefix`, sorted by key.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError>;

    /// Returns `true` if the key is present.
    fn has(&self, key: &[u8]) -> Result<bool, StateError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Read-write access to a key-value state.
pub trait StateAccess: StateReader {
    /// Inserts a key-value pair.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError>;
    /// Deletes a key-value pair.
    fn delete(&mut self, key: &[u8]) -> Result<(), StateError>;
    /// Sets multiple key-value pairs in a single batch operation.
    fn batch_set(&mut self, updates: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StateError> {
        for (key, value) in updates {
            self.insert(key, value)?;
        }
        Ok(())
    }
}

impl<T: StateReader + ?Sized> StateReader for &T {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        (**self).get(key)
    }
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        (**self).prefix_scan(prefix)
    }
}

impl<T: StateReader + ?Sized> StateReader for std::sync::Arc<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        (**self).get(key)
    }
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        (**self).prefix_scan(prefix)
    }
}
