// Path: crates/storage/src/wal.rs
//! Write-ahead log of candidate blocks.
//!
//! Entries are appended to a single sequential file: a bincode header followed
//! by the canonical block bytes. The file is replayed into an in-memory index
//! on open; a torn tail entry from a crash is truncated away.

use anyhow::{anyhow, Result};
use kestrel_api::storage::BlockWal;
use kestrel_types::block::Block;
use kestrel_types::error::StateError;
use kestrel_types::ids::{hash_data, HashValue};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const WAL_FILE: &str = "blocks.wal";

/// Header for a WAL entry.
#[derive(Serialize, Deserialize, Debug)]
pub struct WalEntryHeader {
    /// The block index.
    pub block_index: u32,
    /// Hash of the block bytes.
    pub block_hash: [u8; 32],
    /// Length of the block bytes.
    pub data_len: u64,
}

struct WalWriter {
    file: BufWriter<File>,
}

impl WalWriter {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    fn append(&mut self, block: &Block) -> Result<HashValue> {
        let data = block.to_bytes();
        let header = WalEntryHeader {
            block_index: block.block_index,
            block_hash: hash_data(&data),
            data_len: data.len() as u64,
        };
        bincode::serialize_into(&mut self.file, &header)?;
        self.file.write_all(&data)?;
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(header.block_hash)
    }
}

/// Iterates the entries of a WAL file.
pub struct WalIterator {
    reader: BufReader<File>,
    valid_len: u64,
}

impl WalIterator {
    /// Opens a WAL file for reading.
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            valid_len: 0,
        })
    }

    /// Length of the file prefix holding intact entries read so far.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }
}

impl Iterator for WalIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.fill_buf().ok()?.is_empty() {
            return None;
        }

        let header: WalEntryHeader = match bincode::deserialize_from(&mut self.reader) {
            Ok(h) => h,
            Err(e) => return Some(Err(anyhow!("Failed to read WAL header: {}", e))),
        };

        let mut data_buf = vec![0u8; header.data_len as usize];
        if let Err(e) = self.reader.read_exact(&mut data_buf) {
            return Some(Err(anyhow!("Failed to read WAL body: {}", e)));
        }
        if hash_data(&data_buf) != header.block_hash {
            return Some(Err(anyhow!(
                "WAL entry for block {} fails its hash check",
                header.block_index
            )));
        }
        let block = match Block::from_bytes(&data_buf) {
            Ok(b) => b,
            Err(e) => return Some(Err(anyhow!("Failed to decode block: {}", e))),
        };
        let header_len = bincode::serialized_size(&header).unwrap_or_default();
        self.valid_len += header_len + header.data_len;
        Some(Ok(block))
    }
}

/// A file-backed [`BlockWal`].
pub struct BlockWalFile {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    index: RwLock<HashMap<HashValue, Block>>,
}

impl BlockWalFile {
    /// Opens or creates the WAL in `dir`, loading every intact entry.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(WAL_FILE);
        let mut index = HashMap::new();
        if path.exists() {
            let mut entries = WalIterator::new(&path)?;
            let mut damaged = false;
            for entry in entries.by_ref() {
                match entry {
                    Ok(block) => {
                        index.insert(block.hash(), block);
                    }
                    Err(e) => {
                        tracing::warn!(target: "storage", error = %e, "stopping WAL replay at damaged entry");
                        damaged = true;
                        break;
                    }
                }
            }
            if damaged {
                OpenOptions::new()
                    .write(true)
                    .open(&path)?
                    .set_len(entries.valid_len())?;
            }
        }
        tracing::info!(target: "storage", path = %path.display(), blocks = index.len(), "opened block WAL");
        Ok(Self {
            writer: Mutex::new(WalWriter::open(&path)?),
            path,
            index: RwLock::new(index),
        })
    }

    /// The WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns `true` if no block is stored.
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

impl BlockWal for BlockWalFile {
    fn write(&self, block: &Block) -> Result<(), StateError> {
        let hash = block.hash();
        if self.contains(&hash) {
            return Ok(());
        }
        self.writer
            .lock()
            .append(block)
            .map_err(|e| StateError::Db(format!("WAL append failed: {}", e)))?;
        self.index.write().insert(hash, block.clone());
        tracing::debug!(target: "storage", block_index = block.block_index, "candidate block written to WAL");
        Ok(())
    }

    fn read(&self, hash: &HashValue) -> Result<Option<Block>, StateError> {
        Ok(self.index.read().get(hash).cloned())
    }

    fn contains(&self, hash: &HashValue) -> bool {
        self.index.read().contains_key(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::block::StateUpdate;

    fn block(i: u32) -> Block {
        let mut m = StateUpdate::new();
        m.set(vec![i as u8], vec![1, 2, 3]);
        Block {
            block_index: i,
            timestamp: i as u64,
            previous_l1_commitment: None,
            mutations: m,
        }
    }

    #[test]
    fn blocks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (b1, b2) = (block(1), block(2));
        {
            let wal = BlockWalFile::open(dir.path()).unwrap();
            wal.write(&b1).unwrap();
            wal.write(&b2).unwrap();
            wal.write(&b2).unwrap();
            assert_eq!(wal.len(), 2);
        }
        let wal = BlockWalFile::open(dir.path()).unwrap();
        assert_eq!(wal.read(&b1.hash()).unwrap(), Some(b1));
        assert!(wal.contains(&b2.hash()));
        assert_eq!(WalIterator::new(wal.path()).unwrap().count(), 2);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let b1 = block(1);
        {
            let wal = BlockWalFile::open(dir.path()).unwrap();
            wal.write(&b1).unwrap();
        }
        let path = dir.path().join(WAL_FILE);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[7, 7, 7]).unwrap();
        drop(f);

        let b2 = block(2);
        {
            let wal = BlockWalFile::open(dir.path()).unwrap();
            assert_eq!(wal.len(), 1);
            wal.write(&b2).unwrap();
        }
        let wal = BlockWalFile::open(dir.path()).unwrap();
        assert!(wal.contains(&b1.hash()));
        assert!(wal.contains(&b2.hash()));
    }
}
