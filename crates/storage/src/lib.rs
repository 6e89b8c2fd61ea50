// Path: crates/storage/src/lib.rs
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

//! Durable storage of a chain's blocks.
//!
//! Candidate blocks go to the append-only [`wal`] before their transaction is
//! posted. Committed blocks go to the redb-backed [`block_store`]; the on-disk
//! state is the replay of the committed blocks from origin.

pub mod block_store;
pub mod wal;

pub use block_store::BlockStore;
pub use wal::BlockWalFile;
