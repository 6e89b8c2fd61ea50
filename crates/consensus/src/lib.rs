// Path: crates/consensus/src/lib.rs
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
//! # Kestrel Consensus
//!
//! The per-chain consensus controller. Each committee node runs one
//! [`Controller`] per chain; it proposes a batch, drives ACS to agreement,
//! runs the VM over the decided batch, collects the DSS signature and posts
//! the anchor transaction in a deterministic order.
//!
//! ACS, DSS, the mempool, the L1 connector and the peer transport are
//! trait objects from `kestrel-api`. Their callbacks come back as
//! [`ConsensusMsg`]s, so the controller itself never blocks.

pub mod batch;
pub mod controller;
pub mod messages;
pub mod proposal;
pub mod runner;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use controller::{Collaborators, ConsensusStatus, Controller, ControllerConfig};
pub use messages::{ConsensusMsg, ConsensusSink, ControllerOutput};
pub use runner::{BlockingVmRunner, InlineVmRunner, VmRunner};
pub use workflow::Workflow;
