// Path: crates/validator/src/solid.rs
//! The solid state of a chain as seen by readers outside the state manager.

use kestrel_api::state::StateReader;
use kestrel_state::{with_retry, Baseline, GlobalSync, OptimisticReader, VirtualState};
use kestrel_types::error::StateError;
use parking_lot::RwLock;
use std::sync::Arc;

/// Attempts of one optimistic read before giving up.
pub const READ_ATTEMPTS: usize = 8;

/// A shared handle on the latest solid state.
///
/// The state manager publishes every commit here. Readers go through
/// [`SolidView::read`], which pins a baseline, reads a snapshot and starts
/// over when the solid index moved in between.
#[derive(Debug, Clone, Default)]
pub struct SolidView {
    sync: GlobalSync,
    state: Arc<RwLock<Option<Arc<VirtualState>>>>,
}

impl SolidView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the solid state and invalidates every outstanding baseline.
    pub(crate) fn publish(&self, state: VirtualState, index: u32) {
        *self.state.write() = Some(Arc::new(state));
        self.sync.set_solid_index(index);
    }

    pub fn index(&self) -> Option<u32> {
        self.sync.solid_index()
    }

    /// A baseline at the current solid index.
    pub fn baseline(&self) -> Baseline {
        self.sync.baseline()
    }

    /// One optimistic attempt.
    pub fn try_read<T>(
        &self,
        f: impl FnOnce(&dyn StateReader) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let baseline = self.sync.baseline();
        let snapshot = self
            .state
            .read()
            .clone()
            .ok_or_else(|| StateError::KeyNotFound("solid state".into()))?;
        let reader = OptimisticReader::new(snapshot, baseline);
        f(&reader)
    }

    /// Reads through a fresh baseline, retrying on invalidation.
    pub fn read<T>(
        &self,
        mut f: impl FnMut(&dyn StateReader) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        with_retry(READ_ATTEMPTS, || self.try_read(&mut f))
    }
}
