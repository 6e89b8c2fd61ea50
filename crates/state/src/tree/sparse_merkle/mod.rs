// Path: crates/state/src/tree/sparse_merkle/mod.rs
//! Sparse Merkle tree over hashed key paths.
//!
//! Every key is placed at `sha256(key)`. A leaf sits at the shallowest depth
//! where its path prefix is unique, and a branch left with a single leaf below
//! it collapses into that leaf on delete. The shape of the tree therefore
//! depends only on the set of stored keys, so two nodes holding the same
//! key-value pairs compute the same root regardless of mutation order.

#[cfg(test)]
mod tests;

use kestrel_types::block::StateUpdate;
use kestrel_types::error::StateError;
use kestrel_types::ids::{hash_data, hash_parts, HashValue};
use parity_scale_codec::{Decode, Encode};
use std::fmt::Debug;
use std::sync::Arc;

const LEAF_PREFIX: u8 = 0x00;
const BRANCH_PREFIX: u8 = 0x01;
const TREE_HEIGHT: usize = 256;

/// The root of an empty tree.
pub const EMPTY_ROOT: HashValue = [0u8; 32];

/// Sparse Merkle tree node
#[derive(Clone, PartialEq)]
enum Node {
    Empty,
    Leaf {
        path: HashValue,
        key: Vec<u8>,
        value: Vec<u8>,
        hash: HashValue,
    },
    Branch {
        left: Arc<Node>,
        right: Arc<Node>,
        hash: HashValue,
    },
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Leaf { key, value, .. } => f
                .debug_struct("Leaf")
                .field("key", &hex::encode(key))
                .field("value", &hex::encode(value))
                .finish(),
            Self::Branch { left, right, hash } => f
                .debug_struct("Branch")
                .field("left", left)
                .field("right", right)
                .field("hash", &hex::encode(hash))
                .finish(),
        }
    }
}

fn leaf_hash(path: &HashValue, value: &[u8]) -> HashValue {
    hash_parts(&[&[LEAF_PREFIX], path, value])
}

fn branch_hash(left: &HashValue, right: &HashValue) -> HashValue {
    hash_parts(&[&[BRANCH_PREFIX], left, right])
}

fn get_bit(path: &HashValue, position: usize) -> bool {
    let byte_index = position / 8;
    let bit_index = 7 - (position % 8);
    path.get(byte_index)
        .is_some_and(|&byte| (byte >> bit_index) & 1 == 1)
}

impl Node {
    fn leaf(key: &[u8], value: &[u8]) -> Self {
        let path = hash_data(key);
        Node::Leaf {
            path,
            key: key.to_vec(),
            value: value.to_vec(),
            hash: leaf_hash(&path, value),
        }
    }

    fn branch(left: Arc<Node>, right: Arc<Node>) -> Self {
        let hash = branch_hash(&left.hash(), &right.hash());
        Node::Branch { left, right, hash }
    }

    fn hash(&self) -> HashValue {
        match self {
            Node::Empty => EMPTY_ROOT,
            Node::Leaf { hash, .. } | Node::Branch { hash, .. } => *hash,
        }
    }

    fn path(&self) -> Option<&HashValue> {
        match self {
            Node::Leaf { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Sparse Merkle tree proof.
///
/// `siblings` are ordered from the root down to the terminal node. The
/// terminal node is either the leaf holding the queried key, a witness leaf
/// with a different key (absence), or empty (`leaf == None`, absence).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SparseMerkleProof {
    /// Sibling hashes from the root down.
    pub siblings: Vec<HashValue>,
    /// The `(key, value)` of the terminal leaf, if the walk ended on a leaf.
    pub leaf: Option<(Vec<u8>, Vec<u8>)>,
}

/// Sparse Merkle tree implementation. Cloning is cheap: nodes are shared.
#[derive(Clone)]
pub struct SparseMerkleTree {
    root: Arc<Node>,
    len: usize,
}

impl Debug for SparseMerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseMerkleTree")
            .field("root", &hex::encode(self.root.hash()))
            .field("len", &self.len)
            .finish()
    }
}

impl Default for SparseMerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseMerkleTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Node::Empty),
            len: 0,
        }
    }

    /// The root commitment.
    pub fn root_hash(&self) -> HashValue {
        self.root.hash()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the tree stores nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks a key up by walking its path.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let path = hash_data(key);
        let mut current = &self.root;
        let mut depth = 0;
        loop {
            match current.as_ref() {
                Node::Empty => return None,
                Node::Leaf { path: p, value, .. } => {
                    return (*p == path).then(|| value.clone());
                }
                Node::Branch { left, right, .. } => {
                    current = if get_bit(&path, depth) { right } else { left };
                    depth += 1;
                }
            }
        }
    }

    /// Sets a key.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        let leaf = Arc::new(Node::leaf(key, value));
        let (root, added) = Self::insert_node(&self.root, leaf, 0);
        self.root = root;
        if added {
            self.len += 1;
        }
    }

    /// Removes a key. Removing an absent key leaves the root unchanged.
    pub fn delete(&mut self, key: &[u8]) {
        let path = hash_data(key);
        let (root, removed) = Self::remove_node(&self.root, &path, 0);
        self.root = root;
        if removed {
            self.len = self.len.saturating_sub(1);
        }
    }

    /// Applies every mutation of an update in key order.
    pub fn apply(&mut self, update: &StateUpdate) {
        for (key, value) in update.iter() {
            match value {
                Some(v) => self.insert(key, v),
                None => self.delete(key),
            }
        }
    }

    fn insert_node(node: &Arc<Node>, leaf: Arc<Node>, depth: usize) -> (Arc<Node>, bool) {
        match node.as_ref() {
            Node::Empty => (leaf, true),
            Node::Leaf { path, .. } => {
                if Some(path) == leaf.path() {
                    (leaf, false)
                } else {
                    (Self::split(node.clone(), leaf, depth), true)
                }
            }
            Node::Branch { left, right, .. } => {
                let go_right = leaf.path().is_some_and(|p| get_bit(p, depth));
                if go_right {
                    let (child, added) = Self::insert_node(right, leaf, depth + 1);
                    (Arc::new(Node::branch(left.clone(), child)), added)
                } else {
                    let (child, added) = Self::insert_node(left, leaf, depth + 1);
                    (Arc::new(Node::branch(child, right.clone())), added)
                }
            }
        }
    }

    /// Builds the subtree holding two leaves with distinct paths, starting at `depth`.
    fn split(a: Arc<Node>, b: Arc<Node>, depth: usize) -> Arc<Node> {
        let (Some(pa), Some(pb)) = (a.path().copied(), b.path().copied()) else {
            log::error!("sparse merkle split called on a non-leaf");
            return a;
        };
        if depth >= TREE_HEIGHT {
            log::error!("sparse merkle path collision at {}", hex::encode(pa));
            return b;
        }
        let (bit_a, bit_b) = (get_bit(&pa, depth), get_bit(&pb, depth));
        let empty = Arc::new(Node::Empty);
        let node = match (bit_a, bit_b) {
            (false, true) => Node::branch(a, b),
            (true, false) => Node::branch(b, a),
            (false, false) => Node::branch(Self::split(a, b, depth + 1), empty),
            (true, true) => Node::branch(empty, Self::split(a, b, depth + 1)),
        };
        Arc::new(node)
    }

    fn remove_node(node: &Arc<Node>, path: &HashValue, depth: usize) -> (Arc<Node>, bool) {
        match node.as_ref() {
            Node::Empty => (node.clone(), false),
            Node::Leaf { path: p, .. } => {
                if p == path {
                    (Arc::new(Node::Empty), true)
                } else {
                    (node.clone(), false)
                }
            }
            Node::Branch { left, right, .. } => {
                let (new_left, new_right, removed) = if get_bit(path, depth) {
                    let (child, removed) = Self::remove_node(right, path, depth + 1);
                    (left.clone(), child, removed)
                } else {
                    let (child, removed) = Self::remove_node(left, path, depth + 1);
                    (child, right.clone(), removed)
                };
                if !removed {
                    return (node.clone(), false);
                }
                let collapsed = match (new_left.as_ref(), new_right.as_ref()) {
                    (Node::Empty, Node::Empty) => Arc::new(Node::Empty),
                    (Node::Leaf { .. }, Node::Empty) => new_left,
                    (Node::Empty, Node::Leaf { .. }) => new_right,
                    _ => Arc::new(Node::branch(new_left, new_right)),
                };
                (collapsed, true)
            }
        }
    }

    /// Builds a membership or non-membership proof for `key`.
    pub fn proof(&self, key: &[u8]) -> SparseMerkleProof {
        let path = hash_data(key);
        let mut siblings = Vec::new();
        let mut current = self.root.clone();
        for depth in 0..TREE_HEIGHT {
            let next = match current.as_ref() {
                Node::Empty | Node::Leaf { .. } => break,
                Node::Branch { left, right, .. } => {
                    if get_bit(&path, depth) {
                        siblings.push(left.hash());
                        right.clone()
                    } else {
                        siblings.push(right.hash());
                        left.clone()
                    }
                }
            };
            current = next;
        }
        let leaf = match current.as_ref() {
            Node::Leaf { key, value, .. } => Some((key.clone(), value.clone())),
            _ => None,
        };
        SparseMerkleProof { siblings, leaf }
    }

    /// Verifies a proof against a trusted root.
    ///
    /// `value == Some(v)` claims `key` maps to `v`; `None` claims absence.
    pub fn verify_proof_static(
        root_hash: &HashValue,
        key: &[u8],
        value: Option<&[u8]>,
        proof: &SparseMerkleProof,
    ) -> Result<bool, StateError> {
        if proof.siblings.len() > TREE_HEIGHT {
            return Err(StateError::Validation(format!(
                "proof has {} siblings",
                proof.siblings.len()
            )));
        }
        let path = hash_data(key);
        let terminal = match (&proof.leaf, value) {
            (Some((proof_key, proof_value)), Some(val)) => {
                if proof_key != key || proof_value != val {
                    return Ok(false);
                }
                leaf_hash(&path, proof_value)
            }
            (None, None) => EMPTY_ROOT,
            (Some((witness_key, witness_value)), None) => {
                if witness_key == key {
                    return Ok(false);
                }
                let witness_path = hash_data(witness_key);
                let shares_prefix = (0..proof.siblings.len())
                    .all(|i| get_bit(&witness_path, i) == get_bit(&path, i));
                if !shares_prefix {
                    return Ok(false);
                }
                leaf_hash(&witness_path, witness_value)
            }
            (None, Some(_)) => return Ok(false),
        };

        let mut acc = terminal;
        for (depth, sibling) in proof.siblings.iter().enumerate().rev() {
            acc = if get_bit(&path, depth) {
                branch_hash(sibling, &acc)
            } else {
                branch_hash(&acc, sibling)
            };
        }
        Ok(&acc == root_hash)
    }
}
