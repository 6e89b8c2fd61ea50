// Path: crates/state/src/virtual_state.rs
//! The virtual state: a Merkle-committed, ordered key-value view of one state index.

use crate::tree::sparse_merkle::{SparseMerkleProof, SparseMerkleTree};
use kestrel_api::state::StateReader;
use kestrel_types::block::{Block, StateUpdate};
use kestrel_types::codec::{decode_u32, decode_u64, from_bytes_canonical};
use kestrel_types::error::{BlockError, StateError};
use kestrel_types::ids::{ChainId, HashValue};
use kestrel_types::keys::{chain_key, KEY_BLOCK_INDEX, KEY_CHAIN_ID, KEY_PREV_L1_COMMITMENT, KEY_TIMESTAMP};
use kestrel_types::ledger::L1Commitment;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The block that creates a chain's state: chain id, index 0, timestamp 0.
pub fn origin_block(chain_id: &ChainId) -> Block {
    let mut mutations = StateUpdate::new();
    mutations.set(chain_key(KEY_CHAIN_ID), chain_id.0.to_vec());
    mutations.set(chain_key(KEY_BLOCK_INDEX), 0u32.to_le_bytes().to_vec());
    mutations.set(chain_key(KEY_TIMESTAMP), 0u64.to_le_bytes().to_vec());
    Block {
        block_index: 0,
        timestamp: 0,
        previous_l1_commitment: None,
        mutations,
    }
}

/// The state of a chain at one block index.
///
/// Cloning is cheap until one of the clones is mutated.
#[derive(Clone, Debug)]
pub struct VirtualState {
    tree: SparseMerkleTree,
    kv: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    block_hash: HashValue,
}

impl VirtualState {
    /// The origin state of a chain.
    pub fn origin(chain_id: &ChainId) -> Self {
        let block = origin_block(chain_id);
        let mut state = Self {
            tree: SparseMerkleTree::new(),
            kv: Arc::new(BTreeMap::new()),
            block_hash: [0u8; 32],
        };
        state.apply_update(&block.mutations);
        state.block_hash = block.hash();
        state
    }

    /// The Merkle root.
    pub fn root(&self) -> HashValue {
        self.tree.root_hash()
    }

    /// The hash of the block that produced this state.
    pub fn block_hash(&self) -> HashValue {
        self.block_hash
    }

    /// The commitment published on L1 for this state.
    pub fn l1_commitment(&self) -> L1Commitment {
        L1Commitment {
            state_commitment: self.root(),
            block_hash: self.block_hash,
        }
    }

    /// The chain id recorded at origin.
    pub fn chain_id(&self) -> Result<ChainId, StateError> {
        let raw = self.require(KEY_CHAIN_ID)?;
        Ok(ChainId::from_slice(raw)?)
    }

    /// The block index.
    pub fn block_index(&self) -> Result<u32, StateError> {
        Ok(decode_u32(self.require(KEY_BLOCK_INDEX)?)?)
    }

    /// The state timestamp in unix nanoseconds.
    pub fn timestamp(&self) -> Result<u64, StateError> {
        Ok(decode_u64(self.require(KEY_TIMESTAMP)?)?)
    }

    /// The commitment of the parent state. `None` for the origin state.
    pub fn previous_l1_commitment(&self) -> Result<Option<L1Commitment>, StateError> {
        match self.kv.get(&chain_key(KEY_PREV_L1_COMMITMENT)) {
            Some(raw) => Ok(Some(from_bytes_canonical(raw)?)),
            None => Ok(None),
        }
    }

    fn require(&self, key: &[u8]) -> Result<&[u8], StateError> {
        self.kv
            .get(&chain_key(key))
            .map(Vec::as_slice)
            .ok_or_else(|| StateError::KeyNotFound(String::from_utf8_lossy(key).into_owned()))
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    /// A membership or non-membership proof against [`VirtualState::root`].
    pub fn proof(&self, key: &[u8]) -> SparseMerkleProof {
        self.tree.proof(key)
    }

    fn apply_update(&mut self, update: &StateUpdate) {
        self.tree.apply(update);
        let kv = Arc::make_mut(&mut self.kv);
        for (key, value) in update.iter() {
            match value {
                Some(v) => {
                    kv.insert(key.clone(), v.clone());
                }
                None => {
                    kv.remove(key);
                }
            }
        }
    }

    /// Completes a block on top of this state: stamps the chain-level keys
    /// into the mutations and returns the block plus the resulting state.
    pub fn seal_block(
        &self,
        mut mutations: StateUpdate,
        timestamp: u64,
    ) -> Result<(Block, VirtualState), BlockError> {
        let block_index = self.block_index()? + 1;
        let previous = self.l1_commitment();
        mutations.set(chain_key(KEY_BLOCK_INDEX), block_index.to_le_bytes().to_vec());
        mutations.set(chain_key(KEY_TIMESTAMP), timestamp.to_le_bytes().to_vec());
        mutations.set(chain_key(KEY_PREV_L1_COMMITMENT), previous.to_bytes());
        let block = Block {
            block_index,
            timestamp,
            previous_l1_commitment: Some(previous),
            mutations,
        };
        let next = self.apply_block(&block)?;
        Ok((block, next))
    }

    /// Replays a block on top of this state.
    ///
    /// The block must follow this state and reference its commitment. The
    /// caller checks the resulting commitment against L1 or the next block.
    pub fn apply_block(&self, block: &Block) -> Result<VirtualState, BlockError> {
        let expected_index = self.block_index()? + 1;
        if block.block_index != expected_index {
            return Err(BlockError::InvalidIndex {
                expected: expected_index,
                got: block.block_index,
            });
        }
        let parent = self.l1_commitment();
        if block.previous_l1_commitment != Some(parent) {
            return Err(BlockError::MismatchedPreviousCommitment {
                expected: parent.to_string(),
                got: block
                    .previous_l1_commitment
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".into()),
            });
        }
        let mut next = self.clone();
        next.apply_update(&block.mutations);
        next.block_hash = block.hash();
        let recorded = next.block_index()?;
        if recorded != block.block_index {
            return Err(BlockError::InvalidIndex {
                expected: block.block_index,
                got: recorded,
            });
        }
        Ok(next)
    }

    /// Replays a block and checks the result against an approved commitment.
    pub fn apply_block_checked(
        &self,
        block: &Block,
        approved: &L1Commitment,
    ) -> Result<VirtualState, BlockError> {
        let next = self.apply_block(block)?;
        let got = next.l1_commitment();
        if &got != approved {
            return Err(BlockError::MismatchedStateCommitment {
                expected: approved.to_string(),
                got: got.to_string(),
            });
        }
        Ok(next)
    }
}

impl StateReader for VirtualState {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.kv.get(key).cloned())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        Ok(self
            .kv
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::sparse_merkle::SparseMerkleTree;

    fn chain() -> ChainId {
        ChainId([3u8; 32])
    }

    fn update(pairs: &[(&[u8], &[u8])]) -> StateUpdate {
        let mut u = StateUpdate::new();
        for (k, v) in pairs {
            u.set(k.to_vec(), v.to_vec());
        }
        u
    }

    #[test]
    fn origin_is_index_zero() {
        let origin = VirtualState::origin(&chain());
        assert_eq!(origin.block_index().unwrap(), 0);
        assert_eq!(origin.timestamp().unwrap(), 0);
        assert_eq!(origin.chain_id().unwrap(), chain());
        assert_eq!(origin.previous_l1_commitment().unwrap(), None);
        assert_eq!(origin.block_hash(), origin_block(&chain()).hash());
    }

    #[test]
    fn replaying_a_sealed_block_reproduces_its_commitment() {
        let origin = VirtualState::origin(&chain());
        let (block, produced) = origin
            .seal_block(update(&[(b"xk1", b"v1"), (b"xk2", b"v2")]), 10)
            .unwrap();
        assert_eq!(block.block_index, 1);

        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        let replayed = origin
            .apply_block_checked(&decoded, &produced.l1_commitment())
            .unwrap();
        assert_eq!(replayed.root(), produced.root());
        assert_eq!(replayed.timestamp().unwrap(), 10);
        assert_eq!(replayed.get(b"xk1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(
            replayed.previous_l1_commitment().unwrap(),
            Some(origin.l1_commitment())
        );
    }

    #[test]
    fn out_of_order_block_is_rejected() {
        let origin = VirtualState::origin(&chain());
        let (b1, s1) = origin.seal_block(update(&[(b"a", b"1")]), 1).unwrap();
        let (b2, _) = s1.seal_block(update(&[(b"b", b"2")]), 2).unwrap();
        assert!(matches!(
            origin.apply_block(&b2),
            Err(BlockError::InvalidIndex { expected: 1, got: 2 })
        ));

        let mut forged = b1.clone();
        forged.previous_l1_commitment = Some(L1Commitment::default());
        assert!(matches!(
            origin.apply_block(&forged),
            Err(BlockError::MismatchedPreviousCommitment { .. })
        ));
    }

    #[test]
    fn wrong_approved_commitment_is_rejected() {
        let origin = VirtualState::origin(&chain());
        let (b1, _) = origin.seal_block(update(&[(b"a", b"1")]), 1).unwrap();
        assert!(matches!(
            origin.apply_block_checked(&b1, &L1Commitment::default()),
            Err(BlockError::MismatchedStateCommitment { .. })
        ));
    }

    #[test]
    fn clones_do_not_share_mutations() {
        let origin = VirtualState::origin(&chain());
        let (_, s1) = origin.seal_block(update(&[(b"a", b"1")]), 1).unwrap();
        assert_eq!(origin.get(b"a").unwrap(), None);
        assert_eq!(s1.get(b"a").unwrap(), Some(b"1".to_vec()));
        let proof = s1.proof(b"a");
        assert!(SparseMerkleTree::verify_proof_static(&s1.root(), b"a", Some(b"1"), &proof).unwrap());
    }

    #[test]
    fn prefix_scan_is_ordered() {
        let origin = VirtualState::origin(&chain());
        let (_, s1) = origin
            .seal_block(update(&[(b"p2", b"b"), (b"p1", b"a"), (b"q", b"c")]), 1)
            .unwrap();
        let keys: Vec<_> = s1.prefix_scan(b"p").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"p1".to_vec(), b"p2".to_vec()]);
    }
}
