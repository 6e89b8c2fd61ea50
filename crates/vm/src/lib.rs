// Path: crates/vm/src/lib.rs
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
//! # Kestrel VM
//!
//! Runs batches of requests against a chain state and produces the next block
//! together with the anchor transaction that commits it to L1.
//!
//! * [`run_task`] executes a [`VmTask`]: every request gets a receipt, gas is
//!   metered and charged, and failing requests are rolled back without
//!   touching the rest of the batch.
//! * [`call_view`] runs read-only entry points against a committed state.
//! * [`contracts`] holds the core contracts every chain starts with; further
//!   contracts are native [`Processor`]s registered in a [`ProcessorRegistry`].

pub mod contracts;
pub mod errors;
pub mod gas;
pub mod partition;
pub mod processors;
pub mod sandbox;
pub mod task;
pub mod view;

mod context;

#[cfg(test)]
mod tests;

pub use errors::{CoreError, VmError};
pub use gas::{BurnCode, BurnLog, GasMeter};
pub use processors::{EntryKind, EntryPoint, Processor, ProcessorRegistry};
pub use sandbox::Sandbox;
pub use task::{run_task, VmOutput, VmTask, VmTaskResult};
pub use view::call_view;
