// Path: crates/state/src/sync.rs
//! Solid-index tracking and optimistic reads.
//!
//! The state manager advances the solid index after each commit. A reader
//! acquires a [`Baseline`] first; once the solid index moves, every read
//! through that baseline fails with [`StateError::StateInvalidated`] and the
//! caller starts over with a fresh baseline.

use kestrel_api::state::StateReader;
use kestrel_types::error::StateError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SyncInner {
    generation: AtomicU64,
    solid_index: AtomicU32,
    has_solid: AtomicBool,
}

/// The shared solid-index record of one chain.
#[derive(Debug, Clone, Default)]
pub struct GlobalSync {
    inner: Arc<SyncInner>,
}

impl GlobalSync {
    /// A record with no solid state yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new solid index, invalidating every outstanding baseline.
    pub fn set_solid_index(&self, index: u32) {
        self.inner.solid_index.store(index, Ordering::SeqCst);
        self.inner.has_solid.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Invalidates every outstanding baseline without a new solid state.
    pub fn invalidate(&self) {
        self.inner.has_solid.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// The current solid index.
    pub fn solid_index(&self) -> Option<u32> {
        self.inner
            .has_solid
            .load(Ordering::SeqCst)
            .then(|| self.inner.solid_index.load(Ordering::SeqCst))
    }

    /// Acquires a baseline at the current generation.
    pub fn baseline(&self) -> Baseline {
        Baseline {
            sync: self.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
        }
    }
}

/// A token that stays valid until the solid index next changes.
#[derive(Debug, Clone)]
pub struct Baseline {
    sync: GlobalSync,
    generation: u64,
}

impl Baseline {
    /// Returns `true` while the solid index has not moved.
    pub fn is_valid(&self) -> bool {
        self.sync.inner.generation.load(Ordering::SeqCst) == self.generation
            && self.sync.inner.has_solid.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StateError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StateError::StateInvalidated)
        }
    }
}

/// A reader that fails once its baseline is stale.
pub struct OptimisticReader<R> {
    base: R,
    baseline: Baseline,
}

impl<R: StateReader> OptimisticReader<R> {
    /// Wraps `base` under `baseline`.
    pub fn new(base: R, baseline: Baseline) -> Self {
        Self { base, baseline }
    }

    /// The baseline the reader checks.
    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }
}

impl<R: StateReader> StateReader for OptimisticReader<R> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.baseline.check()?;
        let value = self.base.get(key)?;
        self.baseline.check()?;
        Ok(value)
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        self.baseline.check()?;
        let values = self.base.prefix_scan(prefix)?;
        self.baseline.check()?;
        Ok(values)
    }
}

/// Runs `f` until it returns something other than `StateInvalidated`, at most
/// `attempts` times.
pub fn with_retry<T>(
    attempts: usize,
    mut f: impl FnMut() -> Result<T, StateError>,
) -> Result<T, StateError> {
    for attempt in 0..attempts.max(1) {
        match f() {
            Err(StateError::StateInvalidated) => {
                tracing::debug!(target: "statemgr", attempt, "optimistic read invalidated, retrying");
            }
            other => return other,
        }
    }
    Err(StateError::StateInvalidated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_state::VirtualState;
    use kestrel_types::ids::ChainId;
    use kestrel_types::keys::{chain_key, KEY_BLOCK_INDEX};

    #[test]
    fn reads_fail_after_the_solid_index_moves() {
        let sync = GlobalSync::new();
        sync.set_solid_index(0);
        let reader = OptimisticReader::new(VirtualState::origin(&ChainId([1; 32])), sync.baseline());
        assert!(reader.get(&chain_key(KEY_BLOCK_INDEX)).unwrap().is_some());
        sync.set_solid_index(1);
        assert_eq!(
            reader.get(&chain_key(KEY_BLOCK_INDEX)),
            Err(StateError::StateInvalidated)
        );
        assert_eq!(sync.solid_index(), Some(1));
    }

    #[test]
    fn no_solid_state_means_invalid() {
        let sync = GlobalSync::new();
        assert!(!sync.baseline().is_valid());
        sync.set_solid_index(4);
        let b = sync.baseline();
        assert!(b.is_valid());
        sync.invalidate();
        assert!(!b.is_valid());
        assert_eq!(sync.solid_index(), None);
    }

    #[test]
    fn retry_gives_up_after_attempts() {
        let mut calls = 0;
        let res: Result<(), _> = with_retry(3, || {
            calls += 1;
            Err(StateError::StateInvalidated)
        });
        assert_eq!(res, Err(StateError::StateInvalidated));
        assert_eq!(calls, 3);

        let mut calls = 0;
        let res = with_retry(3, || {
            calls += 1;
            if calls < 2 {
                Err(StateError::StateInvalidated)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(res, Ok(2));
    }
}
