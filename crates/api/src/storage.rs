// Path: crates/api/src/storage.rs
//! Durable storage of candidate blocks.

use kestrel_types::block::Block;
use kestrel_types::error::StateError;
use kestrel_types::ids::HashValue;

/// A write-ahead log of blocks keyed by block hash.
///
/// Consensus writes every candidate block before its transaction is posted so a
/// restarted node can still serve it to peers.
pub trait BlockWal: Send + Sync {
    /// Durably stores a block.
    fn write(&self, block: &Block) -> Result<(), StateError>;
    /// Reads a block by hash.
    fn read(&self, hash: &HashValue) -> Result<Option<Block>, StateError>;
    /// Returns `true` if the block is stored.
    fn contains(&self, hash: &HashValue) -> bool;
}
