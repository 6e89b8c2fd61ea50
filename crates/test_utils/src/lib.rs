// Path: crates/test_utils/src/lib.rs
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

//! # Kestrel Test Utilities
//!
//! In-process doubles for every collaborator of a chain node: an L1 ledger,
//! ACS and DSS committees, a peer network and a manual clock, plus fixtures
//! and test contracts.

pub mod acs;
pub mod clock;
pub mod dss;
pub mod fixtures;
pub mod l1;
pub mod network;
pub mod programs;

pub use acs::LocalAcs;
pub use clock::ManualClock;
pub use dss::LocalDss;
pub use l1::MockL1;
pub use network::LocalNetwork;
