// Path: crates/api/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]
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
//! # Kestrel API
//!
//! Capability traits for the kestrel chain runtime. The consensus controller
//! and the state manager receive these as explicit trait objects instead of
//! reaching into each other, so every collaborator can be swapped for an
//! in-process double in tests.

/// The client-facing surface of a running chain.
pub mod client;
/// Wall-clock time.
pub mod clock;
/// The ACS and DSS black boxes.
pub mod consensus;
/// The L1 ledger connector.
pub mod l1;
/// The pending request pool.
pub mod mempool;
/// Committee peer transport.
pub mod peer;
/// State reader and writer traits plus the copy-on-write overlay.
pub mod state;
/// The write-ahead log of candidate blocks.
pub mod storage;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::client::ChainClient;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::consensus::{AcsOutput, AcsRunner, DssKey, DssRunner};
    pub use crate::l1::{L1Connector, L1Handlers};
    pub use crate::mempool::{RequestPool, ResolvedRequests};
    pub use crate::peer::PeerTransport;
    pub use crate::state::{StateAccess, StateOverlay, StateReader};
    pub use crate::storage::BlockWal;
}
