// Path: crates/storage/src/block_store.rs
//! The committed block store (redb).
//!
//! One table maps block index to canonical block bytes. The solid state is
//! rebuilt on startup by replaying every stored block from origin.

use kestrel_state::VirtualState;
use kestrel_types::block::Block;
use kestrel_types::error::{BlockError, StateError};
use kestrel_types::ids::ChainId;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const BLOCKS: TableDefinition<u32, &[u8]> = TableDefinition::new("BLOCKS");

fn db_err(e: impl std::fmt::Display) -> StateError {
    StateError::Db(e.to_string())
}

/// Append-only store of committed blocks keyed by block index.
#[derive(Clone)]
pub struct BlockStore {
    db: Arc<Database>,
}

impl BlockStore {
    /// Opens or creates the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        {
            let w = db.begin_write().map_err(db_err)?;
            w.open_table(BLOCKS).map_err(db_err)?;
            w.commit().map_err(db_err)?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    /// Stores a committed block. Re-storing the same index overwrites it.
    pub fn put(&self, block: &Block) -> Result<(), StateError> {
        let bytes = block.to_bytes();
        let w = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = w.open_table(BLOCKS).map_err(db_err)?;
            table
                .insert(block.block_index, bytes.as_slice())
                .map_err(db_err)?;
        }
        w.commit().map_err(db_err)?;
        tracing::debug!(target: "storage", block_index = block.block_index, "block committed to store");
        Ok(())
    }

    /// Reads a block by index.
    pub fn get(&self, index: u32) -> Result<Option<Block>, StateError> {
        let r = self.db.begin_read().map_err(db_err)?;
        let table = r.open_table(BLOCKS).map_err(db_err)?;
        let Some(guard) = table.get(index).map_err(db_err)? else {
            return Ok(None);
        };
        Ok(Some(Block::from_bytes(guard.value())?))
    }

    /// The highest stored index.
    pub fn latest_index(&self) -> Result<Option<u32>, StateError> {
        let r = self.db.begin_read().map_err(db_err)?;
        let table = r.open_table(BLOCKS).map_err(db_err)?;
        let last = table.last().map_err(db_err)?.map(|(k, _)| k.value());
        Ok(last)
    }

    /// Rebuilds the latest state by replaying every stored block on top of the
    /// origin state. Returns the origin state when the store is empty.
    pub fn load_state(&self, chain_id: &ChainId) -> Result<VirtualState, BlockError> {
        let mut state = VirtualState::origin(chain_id);
        let r = self.db.begin_read().map_err(db_err)?;
        let table = r.open_table(BLOCKS).map_err(db_err)?;
        for entry in table.range(1u32..).map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let block = Block::from_bytes(v.value())?;
            state = state.apply_block(&block)?;
        }
        Ok(state)
    }
}
