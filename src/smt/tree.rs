//! Fixed-depth sparse Merkle tree
//!
//! Level 0 holds the leaves, level `depth` holds the root. Only nodes that
//! differ from the per-level default are materialised; every other node is
//! `default_hashes[level]`.
//!
//! Two construction modes share one hashing rule and therefore produce the
//! same root for the same final leaf set:
//! - incremental: [`SparseMerkleTree::update`] walks one sibling path
//! - batch: [`SparseMerkleTree::from_leaves`] / [`compute_root`] fold the whole
//!   leaf set level by level, touching each non-default node once

use crate::crypto::{hash_left_right, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Deepest supported tree. Leaf indices are `u128`.
pub const MAX_DEPTH: u8 = 128;

/// Leaf position in the `2^depth` index space.
pub type LeafIndex = u128;

/// Sparse Merkle tree errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmtError {
    #[error("tree depth {depth} outside supported range 1..={max}", max = MAX_DEPTH)]
    InvalidDepth { depth: u8 },

    #[error("leaf index {index} out of bounds for depth {depth}")]
    IndexOutOfBounds { index: LeafIndex, depth: u8 },
}

/// Sibling path for one leaf, ordered from the leaf level upwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub siblings: Vec<Scalar>,
}

impl MerkleProof {
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }
}

/// Sparse Merkle tree over `2^depth` leaves.
#[derive(Debug, Clone)]
pub struct SparseMerkleTree {
    depth: u8,
    /// `default_hashes[0]` is the default leaf, `default_hashes[depth]` the empty root.
    default_hashes: Vec<Scalar>,
    /// Non-default nodes keyed by (level, index within level).
    nodes: HashMap<(u8, LeafIndex), Scalar>,
    root: Scalar,
}

fn check_depth(depth: u8) -> Result<(), SmtError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(SmtError::InvalidDepth { depth });
    }
    Ok(())
}

fn check_index(depth: u8, index: LeafIndex) -> Result<(), SmtError> {
    if depth < MAX_DEPTH && index >> depth != 0 {
        return Err(SmtError::IndexOutOfBounds { index, depth });
    }
    Ok(())
}

fn default_hashes(depth: u8, default_leaf: Scalar) -> Vec<Scalar> {
    let mut hashes = Vec::with_capacity(depth as usize + 1);
    hashes.push(default_leaf);
    for level in 1..=depth as usize {
        let below = hashes[level - 1];
        hashes.push(hash_left_right(&below, &below));
    }
    hashes
}

/// Hash one level of a sparse node map into its parent level.
fn fold_level(
    level: &BTreeMap<LeafIndex, Scalar>,
    default: &Scalar,
) -> BTreeMap<LeafIndex, Scalar> {
    let mut parents = BTreeMap::new();
    let mut iter = level.iter().peekable();
    while let Some((&index, value)) = iter.next() {
        let parent = index >> 1;
        let (left, right) = if index & 1 == 0 {
            // Right sibling is the next entry only if it shares the parent.
            let right = match iter.peek() {
                Some(&(&next, next_value)) if next == index | 1 => {
                    let right = *next_value;
                    iter.next();
                    right
                }
                _ => *default,
            };
            (*value, right)
        } else {
            (*default, *value)
        };
        parents.insert(parent, hash_left_right(&left, &right));
    }
    parents
}

fn collect_leaves<I>(depth: u8, leaves: I) -> Result<BTreeMap<LeafIndex, Scalar>, SmtError>
where
    I: IntoIterator<Item = (LeafIndex, Scalar)>,
{
    check_depth(depth)?;
    let mut level = BTreeMap::new();
    for (index, value) in leaves {
        check_index(depth, index)?;
        // Later writes to the same index overwrite earlier ones.
        level.insert(index, value);
    }
    Ok(level)
}

/// Root of a tree holding `leaves`, without materialising any nodes above
/// the level currently being folded.
pub fn compute_root<I>(depth: u8, default_leaf: Scalar, leaves: I) -> Result<Scalar, SmtError>
where
    I: IntoIterator<Item = (LeafIndex, Scalar)>,
{
    let mut level = collect_leaves(depth, leaves)?;
    let defaults = default_hashes(depth, default_leaf);
    for default in defaults.iter().take(depth as usize) {
        level = fold_level(&level, default);
    }
    Ok(level.get(&0).copied().unwrap_or(defaults[depth as usize]))
}

/// Rebuild a root from a leaf value and its sibling path.
///
/// Returns `None` if the index does not fit the path length.
pub fn compute_root_from_path(
    index: LeafIndex,
    leaf: &Scalar,
    proof: &MerkleProof,
) -> Option<Scalar> {
    let depth = u8::try_from(proof.siblings.len()).ok()?;
    check_depth(depth).ok()?;
    check_index(depth, index).ok()?;

    let mut current = *leaf;
    let mut position = index;
    for sibling in &proof.siblings {
        current = if position & 1 == 0 {
            hash_left_right(&current, sibling)
        } else {
            hash_left_right(sibling, &current)
        };
        position >>= 1;
    }
    Some(current)
}

/// Check a Merkle path against a known root without holding the tree.
pub fn verify_path(root: &Scalar, index: LeafIndex, leaf: &Scalar, proof: &MerkleProof) -> bool {
    compute_root_from_path(index, leaf, proof).is_some_and(|computed| computed == *root)
}

impl SparseMerkleTree {
    /// Create an empty tree where every leaf holds `default_leaf`.
    pub fn new(depth: u8, default_leaf: Scalar) -> Result<Self, SmtError> {
        check_depth(depth)?;
        let default_hashes = default_hashes(depth, default_leaf);
        let root = default_hashes[depth as usize];
        Ok(Self {
            depth,
            default_hashes,
            nodes: HashMap::new(),
            root,
        })
    }

    /// Root of an empty tree of `depth` levels.
    pub fn empty_root(depth: u8, default_leaf: Scalar) -> Result<Scalar, SmtError> {
        check_depth(depth)?;
        Ok(default_hashes(depth, default_leaf)[depth as usize])
    }

    /// One-time construction from a fixed leaf set.
    ///
    /// Each level is computed once from the level below; no intermediate
    /// per-update roots are produced. Duplicate indices keep the last value.
    pub fn from_leaves<I>(depth: u8, default_leaf: Scalar, leaves: I) -> Result<Self, SmtError>
    where
        I: IntoIterator<Item = (LeafIndex, Scalar)>,
    {
        let mut tree = Self::new(depth, default_leaf)?;
        let mut level = collect_leaves(depth, leaves)?;

        for height in 0..depth {
            tree.nodes
                .extend(level.iter().map(|(index, value)| ((height, *index), *value)));
            level = fold_level(&level, &tree.default_hashes[height as usize]);
        }

        if let Some(root) = level.get(&0) {
            tree.nodes.insert((depth, 0), *root);
            tree.root = *root;
        }
        Ok(tree)
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn root(&self) -> Scalar {
        self.root
    }

    pub fn default_hash(&self, level: u8) -> Option<Scalar> {
        self.default_hashes.get(level as usize).copied()
    }

    fn node(&self, level: u8, index: LeafIndex) -> Scalar {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.default_hashes[level as usize])
    }

    pub fn get_leaf(&self, index: LeafIndex) -> Result<Scalar, SmtError> {
        check_index(self.depth, index)?;
        Ok(self.node(0, index))
    }

    /// Overwrite one leaf and recompute the root along its sibling path.
    pub fn update(&mut self, index: LeafIndex, value: Scalar) -> Result<Scalar, SmtError> {
        check_index(self.depth, index)?;

        let mut current = value;
        let mut position = index;
        self.nodes.insert((0, position), current);

        for level in 0..self.depth {
            let sibling = self.node(level, position ^ 1);
            current = if position & 1 == 0 {
                hash_left_right(&current, &sibling)
            } else {
                hash_left_right(&sibling, &current)
            };
            position >>= 1;
            self.nodes.insert((level + 1, position), current);
        }

        self.root = current;
        Ok(current)
    }

    /// Sibling hashes from the leaf level up to (excluding) the root.
    pub fn get_merkle_proof(&self, index: LeafIndex) -> Result<MerkleProof, SmtError> {
        check_index(self.depth, index)?;

        let mut siblings = Vec::with_capacity(self.depth as usize);
        let mut position = index;
        for level in 0..self.depth {
            siblings.push(self.node(level, position ^ 1));
            position >>= 1;
        }
        Ok(MerkleProof { siblings })
    }

    /// Recompute the root from the stored leaf at `index` and `proof`, and
    /// compare it with the current root.
    pub fn verify_merkle_proof(
        &self,
        index: LeafIndex,
        proof: &MerkleProof,
    ) -> Result<bool, SmtError> {
        let leaf = self.get_leaf(index)?;
        if proof.len() != self.depth as usize {
            return Ok(false);
        }
        Ok(verify_path(&self.root, index, &leaf, proof))
    }

    /// Number of materialised (non-default) nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(v: u64) -> Scalar {
        Scalar::from_u64(v)
    }

    #[test]
    fn test_depth_bounds() {
        assert_eq!(
            SparseMerkleTree::new(0, Scalar::ZERO).unwrap_err(),
            SmtError::InvalidDepth { depth: 0 }
        );
        assert_eq!(
            SparseMerkleTree::new(129, Scalar::ZERO).unwrap_err(),
            SmtError::InvalidDepth { depth: 129 }
        );
        assert!(SparseMerkleTree::new(128, Scalar::ZERO).is_ok());
    }

    #[test]
    fn test_default_hashes_fold_upwards() {
        let tree = SparseMerkleTree::new(3, value(9)).unwrap();
        let l1 = hash_left_right(&value(9), &value(9));
        let l2 = hash_left_right(&l1, &l1);
        let l3 = hash_left_right(&l2, &l2);
        assert_eq!(tree.default_hash(1), Some(l1));
        assert_eq!(tree.root(), l3);
        assert_eq!(SparseMerkleTree::empty_root(3, value(9)).unwrap(), l3);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let mut tree = SparseMerkleTree::new(4, Scalar::ZERO).unwrap();
        assert_eq!(
            tree.update(16, value(1)).unwrap_err(),
            SmtError::IndexOutOfBounds { index: 16, depth: 4 }
        );
        assert!(tree.get_merkle_proof(16).is_err());
        assert!(tree.update(15, value(1)).is_ok());
    }

    #[test]
    fn test_overwrite_keeps_last_value() {
        // Depth-4 tree, writes at {1, 3, 3}: index 3 must validate against v3.
        let (v1, v2, v3) = (value(11), value(22), value(33));
        let mut tree = SparseMerkleTree::new(4, Scalar::ZERO).unwrap();
        tree.update(1, v1).unwrap();
        tree.update(3, v2).unwrap();
        tree.update(3, v3).unwrap();

        assert_eq!(tree.get_leaf(3).unwrap(), v3);
        let proof = tree.get_merkle_proof(3).unwrap();
        assert_eq!(proof.len(), 4);
        assert!(tree.verify_merkle_proof(3, &proof).unwrap());
        assert!(verify_path(&tree.root(), 3, &v3, &proof));
        assert!(!verify_path(&tree.root(), 3, &v2, &proof));
    }

    #[test]
    fn test_batch_matches_incremental() {
        let leaves = vec![(1u128, value(11)), (3, value(22)), (3, value(33)), (14, value(7))];

        let mut incremental = SparseMerkleTree::new(4, Scalar::ZERO).unwrap();
        for (index, v) in &leaves {
            incremental.update(*index, *v).unwrap();
        }
        let batch = SparseMerkleTree::from_leaves(4, Scalar::ZERO, leaves.clone()).unwrap();
        let root_only = compute_root(4, Scalar::ZERO, leaves).unwrap();

        assert_eq!(incremental.root(), batch.root());
        assert_eq!(batch.root(), root_only);
        assert_eq!(batch.get_leaf(3).unwrap(), value(33));
    }

    #[test]
    fn test_batch_tree_serves_proofs() {
        let leaves = vec![(0u128, value(1)), (5, value(2)), (6, value(3))];
        let tree = SparseMerkleTree::from_leaves(3, Scalar::ZERO, leaves).unwrap();
        for index in 0..8 {
            let proof = tree.get_merkle_proof(index).unwrap();
            assert!(tree.verify_merkle_proof(index, &proof).unwrap());
        }
    }

    #[test]
    fn test_empty_tree_default_proofs() {
        let tree = SparseMerkleTree::new(5, Scalar::ZERO).unwrap();
        for index in 0..32 {
            let proof = tree.get_merkle_proof(index).unwrap();
            assert!(tree.verify_merkle_proof(index, &proof).unwrap());
        }
        assert_eq!(tree.node_count(), 0);
    }

    #[test]
    fn test_empty_batch_is_empty_root() {
        let root = compute_root(6, Scalar::ZERO, Vec::new()).unwrap();
        assert_eq!(root, SparseMerkleTree::empty_root(6, Scalar::ZERO).unwrap());
    }

    #[test]
    fn test_wrong_length_proof_rejected() {
        let mut tree = SparseMerkleTree::new(4, Scalar::ZERO).unwrap();
        tree.update(2, value(5)).unwrap();
        let mut proof = tree.get_merkle_proof(2).unwrap();
        proof.siblings.pop();
        assert!(!tree.verify_merkle_proof(2, &proof).unwrap());
    }

    #[test]
    fn test_tampered_sibling_rejected() {
        let mut tree = SparseMerkleTree::new(4, Scalar::ZERO).unwrap();
        tree.update(2, value(5)).unwrap();
        tree.update(9, value(6)).unwrap();
        let mut proof = tree.get_merkle_proof(2).unwrap();
        proof.siblings[2] = value(1234);
        assert!(!tree.verify_merkle_proof(2, &proof).unwrap());
    }

    #[test]
    fn test_full_width_indices_at_max_depth() {
        let mut tree = SparseMerkleTree::new(MAX_DEPTH, Scalar::ZERO).unwrap();
        tree.update(u128::MAX, value(1)).unwrap();
        let batch =
            SparseMerkleTree::from_leaves(MAX_DEPTH, Scalar::ZERO, vec![(u128::MAX, value(1))])
                .unwrap();
        assert_eq!(tree.root(), batch.root());
        let proof = tree.get_merkle_proof(u128::MAX).unwrap();
        assert!(tree.verify_merkle_proof(u128::MAX, &proof).unwrap());
    }
}
