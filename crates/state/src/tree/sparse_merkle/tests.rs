// Path: crates/state/src/tree/sparse_merkle/tests.rs

use super::{SparseMerkleProof, SparseMerkleTree, EMPTY_ROOT};
use parity_scale_codec::{Decode, Encode};
use proptest::prelude::*;

#[test]
fn test_smt_presence_and_absence_proofs() {
    let mut tree = SparseMerkleTree::new();
    tree.insert(b"\xAA\x00", b"value1");
    tree.insert(b"\xAA\xFF", b"value2");

    let root = tree.root_hash();
    assert_ne!(root, EMPTY_ROOT);

    let present = tree.proof(b"\xAA\x00");
    assert!(
        SparseMerkleTree::verify_proof_static(&root, b"\xAA\x00", Some(b"value1"), &present)
            .unwrap()
    );
    assert!(
        !SparseMerkleTree::verify_proof_static(&root, b"\xAA\x00", Some(b"forged"), &present)
            .unwrap()
    );

    let absent = tree.proof(b"\xAA\x80");
    if let Some((witness_key, _)) = &absent.leaf {
        assert_ne!(witness_key.as_slice(), b"\xAA\x80");
    }
    assert!(SparseMerkleTree::verify_proof_static(&root, b"\xAA\x80", None, &absent).unwrap());
    assert!(
        !SparseMerkleTree::verify_proof_static(&root, b"\xAA\x80", Some(b"value1"), &absent)
            .unwrap()
    );
}

#[test]
fn test_smt_proof_encoding_is_stable() {
    let mut tree = SparseMerkleTree::new();
    for i in 0u32..20 {
        tree.insert(&i.to_le_bytes(), &[i as u8; 3]);
    }
    let proof = tree.proof(&7u32.to_le_bytes());
    let decoded = SparseMerkleProof::decode(&mut proof.encode().as_slice()).unwrap();
    assert_eq!(decoded, proof);
    assert!(SparseMerkleTree::verify_proof_static(
        &tree.root_hash(),
        &7u32.to_le_bytes(),
        Some(&[7u8; 3]),
        &decoded
    )
    .unwrap());
}

#[test]
fn test_smt_delete_restores_previous_root() {
    let mut tree = SparseMerkleTree::new();
    tree.insert(b"a", b"1");
    tree.insert(b"b", b"2");
    let before = tree.root_hash();
    tree.insert(b"c", b"3");
    assert_ne!(tree.root_hash(), before);
    tree.delete(b"c");
    assert_eq!(tree.root_hash(), before);
    assert_eq!(tree.len(), 2);
    tree.delete(b"missing");
    assert_eq!(tree.root_hash(), before);
    tree.delete(b"a");
    tree.delete(b"b");
    assert_eq!(tree.root_hash(), EMPTY_ROOT);
    assert!(tree.is_empty());
}

#[test]
fn test_smt_overwrite_keeps_len() {
    let mut tree = SparseMerkleTree::new();
    tree.insert(b"k", b"1");
    let first = tree.root_hash();
    tree.insert(b"k", b"2");
    assert_eq!(tree.len(), 1);
    assert_ne!(tree.root_hash(), first);
    assert_eq!(tree.get(b"k"), Some(b"2".to_vec()));
}

proptest! {
    #[test]
    fn smt_absence_proof_for_unknown_key_proptest(
        keys in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 1..16), 1..24),
        absent in prop::collection::vec(any::<u8>(), 1..16),
    ) {
        prop_assume!(!keys.contains(&absent));
        let mut tree = SparseMerkleTree::new();
        for k in &keys {
            tree.insert(k, k);
        }
        let root = tree.root_hash();
        let proof = tree.proof(&absent);
        prop_assert!(SparseMerkleTree::verify_proof_static(&root, &absent, None, &proof).unwrap());
        for k in &keys {
            let p = tree.proof(k);
            prop_assert!(SparseMerkleTree::verify_proof_static(&root, k, Some(k), &p).unwrap());
            prop_assert!(!SparseMerkleTree::verify_proof_static(&root, k, None, &p).unwrap());
        }
    }

    #[test]
    fn smt_root_is_independent_of_mutation_order_proptest(
        entries in prop::collection::btree_map(
            prop::collection::vec(any::<u8>(), 1..8),
            prop::collection::vec(any::<u8>(), 1..8),
            1..32,
        ),
        removed in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let pairs: Vec<_> = entries.into_iter().collect();
        let mut forward = SparseMerkleTree::new();
        for (k, v) in &pairs {
            forward.insert(k, v);
        }
        let mut backward = SparseMerkleTree::new();
        for (k, v) in pairs.iter().rev() {
            backward.insert(k, v);
        }
        prop_assert_eq!(forward.root_hash(), backward.root_hash());

        let mut fresh = SparseMerkleTree::new();
        let gone: std::collections::BTreeSet<usize> =
            removed.iter().map(|i| i.index(pairs.len())).collect();
        for idx in &gone {
            forward.delete(&pairs[*idx].0);
        }
        for (i, (k, v)) in pairs.iter().enumerate() {
            if !gone.contains(&i) {
                fresh.insert(k, v);
            }
        }
        prop_assert_eq!(forward.root_hash(), fresh.root_hash());
        prop_assert_eq!(forward.len(), fresh.len());
    }
}
