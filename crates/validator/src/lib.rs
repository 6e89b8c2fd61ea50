// Path: crates/validator/src/lib.rs
#![forbid(unsafe_code)]
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! # Kestrel Validator
//!
//! The committee node side of a chain: the request [`Mempool`], the
//! [`StateManager`] that keeps the solid state in step with L1, and the
//! [`ChainNode`] runtime that wires both to the consensus controller through
//! bounded mailboxes and serves clients through
//! [`ChainClient`](kestrel_api::client::ChainClient).

pub mod chain;
pub mod mempool;
pub mod solid;
pub mod statemgr;

pub use chain::{ChainNode, ChainParams, ChainServices, ChainStatus};
pub use mempool::Mempool;
pub use solid::SolidView;
pub use statemgr::{StateManager, StateManagerStatus, StateMsg, StateOutput};
