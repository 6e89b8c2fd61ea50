// Path: crates/types/src/lib.rs
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

//! # Kestrel Types
//!
//! The foundational library of the kestrel chain runtime. It holds every data
//! structure that crosses a crate boundary: identifiers, assets, L1-style
//! outputs, requests, receipts, block records, the gas-fee policy, peer
//! messages, configuration and the unified error enums.
//!
//! ## Architectural Role
//!
//! `kestrel-types` has no dependency on any other workspace crate. Anything
//! consensus-critical is encoded with the canonical codec in [`codec`], so two
//! honest nodes always produce byte-identical commitments.

/// Fungible and non-fungible asset bundles.
pub mod assets;
/// State updates and sealed blocks.
pub mod block;
/// Block-level records kept by the block log.
pub mod block_info;
/// The canonical, deterministic binary codec for consensus-critical data.
pub mod codec;
/// Shared configuration structures (timers, limits, rent structure).
pub mod config;
/// String-keyed parameter dictionaries passed to contract entry points.
pub mod dict;
/// A unified set of all error types used across the runtime.
pub mod error;
/// The gas-fee policy persisted by the governance contract.
pub mod fee_policy;
/// Identifiers: hashed names, chains, addresses, agents, outputs and tokens.
pub mod ids;
/// Well-known contract names and reserved state keys.
pub mod keys;
/// L1-style outputs, the anchor, L1 commitments and transaction essences.
pub mod ledger;
/// Peer message tags and payloads.
pub mod messages;
/// Receipts and VM error codes.
pub mod receipt;
/// On-ledger and off-ledger requests.
pub mod request;

pub use primitive_types::U256;
