//! Property-based tests for the sparse Merkle tree
//!
//! Tests for:
//! - Construction equivalence: incremental updates vs one-time batch
//! - Proof completeness: every written index verifies
//! - Proof soundness: a proof does not validate a different leaf value

use super::tree::{compute_root, verify_path, SparseMerkleTree};
use crate::crypto::Scalar;
use proptest::prelude::*;

fn leaf_set(depth: u8) -> impl Strategy<Value = Vec<(u128, u64)>> {
    let width = 1u128 << depth;
    prop::collection::vec((0..width, any::<u64>()), 0..40)
}

proptest! {
    /// Property: incremental and batch construction agree on the root
    #[test]
    fn batch_root_matches_incremental(depth in 1u8..12, seed in any::<u64>()) {
        let width = 1u128 << depth;
        let leaves: Vec<(u128, Scalar)> = (0..24u64)
            .map(|i| {
                let index = (seed.wrapping_mul(i + 1).wrapping_add(i * 7) as u128) % width;
                (index, Scalar::from_u64(seed ^ i))
            })
            .collect();

        let mut incremental = SparseMerkleTree::new(depth, Scalar::ZERO).unwrap();
        for (index, value) in &leaves {
            incremental.update(*index, *value).unwrap();
        }
        let batch = SparseMerkleTree::from_leaves(depth, Scalar::ZERO, leaves.clone()).unwrap();
        let root_only = compute_root(depth, Scalar::ZERO, leaves).unwrap();

        prop_assert_eq!(incremental.root(), batch.root());
        prop_assert_eq!(batch.root(), root_only);
    }

    /// Property: proofs for written indices verify against the current root
    #[test]
    fn written_indices_verify(leaves in leaf_set(8)) {
        let mut tree = SparseMerkleTree::new(8, Scalar::ZERO).unwrap();
        for (index, value) in &leaves {
            tree.update(*index, Scalar::from_u64(*value)).unwrap();
        }
        for (index, _) in &leaves {
            let proof = tree.get_merkle_proof(*index).unwrap();
            prop_assert!(tree.verify_merkle_proof(*index, &proof).unwrap());
        }
    }

    /// Property: a valid path does not validate a different leaf value
    #[test]
    fn proof_binds_leaf_value(
        leaves in leaf_set(6),
        index in 0u128..64,
        bogus in any::<u64>(),
    ) {
        let tree = SparseMerkleTree::from_leaves(
            6,
            Scalar::ZERO,
            leaves.iter().map(|(i, v)| (*i, Scalar::from_u64(*v))),
        )
        .unwrap();
        let stored = tree.get_leaf(index).unwrap();
        let bogus = Scalar::from_u64(bogus);
        if bogus == stored {
            return Ok(());
        }
        let proof = tree.get_merkle_proof(index).unwrap();
        prop_assert!(verify_path(&tree.root(), index, &stored, &proof));
        prop_assert!(!verify_path(&tree.root(), index, &bogus, &proof));
    }
}
