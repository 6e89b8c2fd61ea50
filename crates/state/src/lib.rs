// Path: crates/state/src/lib.rs
#![forbid(unsafe_code)]
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]
//! # Kestrel State
//!
//! The commitment-bearing key-value state of a chain.
//!
//! * [`tree::sparse_merkle`] commits the state to a single root with
//!   membership and non-membership proofs.
//! * [`VirtualState`] pairs the tree with an ordered key-value view and applies
//!   blocks.
//! * [`StateStore`] keeps committed versions by block index.
//! * [`sync`] tracks the solid index and implements optimistic reads.

pub mod store;
pub mod sync;
pub mod tree;
pub mod virtual_state;

pub use store::StateStore;
pub use sync::{with_retry, Baseline, GlobalSync, OptimisticReader};
pub use virtual_state::{origin_block, VirtualState};
