// Path: crates/state/src/tree/mod.rs
//! State trees.

pub mod sparse_merkle;
