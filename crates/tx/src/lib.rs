// Path: crates/tx/src/lib.rs
//! # Kestrel Transaction Builder
//!
//! Assembles the anchor transaction a block produces. The VM drives an
//! [`AnchorTransactionBuilder`] while it executes requests; every asset
//! movement on L2 is mirrored here as an input consumed or an output produced,
//! so the resulting essence keeps L1 and L2 balanced.
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

pub mod builder;
pub mod deposit;
pub mod records;
pub mod rotate;

pub use builder::{
    AnchorTransactionBuilder, BuildError, InternalOutput, InternalOutputKey, OutputLoader,
    MAX_INPUTS, MAX_NATIVE_TOKENS, MAX_OUTPUTS,
};
pub use records::{FoundryRecord, NativeTokenRecord, NftRecord, OutputRecord};
pub use rotate::build_rotation_essence;

use kestrel_types::ids::{hash_data, HashValue};
use kestrel_types::ledger::Output;
use parity_scale_codec::Encode;

/// Hash over the canonical bytes of the consumed outputs, in input order.
pub fn inputs_commitment(consumed: &[Output]) -> HashValue {
    hash_data(&consumed.encode())
}
