//! Sparse Merkle tree engine
//!
//! Builds the epoch tree: a fixed-depth tree whose leaves are
//! `(epoch_key, hashchain)` pairs of one sealed epoch. Also used at start-up to
//! derive the empty user state root.
//!
//! ## Guarantees
//! - Incremental updates and one-time batch construction give identical roots
//! - Every index, written or default, has a verifiable sibling path
//! - Indices `>= 2^depth` are rejected

pub mod tree;

#[cfg(test)]
mod proptests;

pub use tree::{
    compute_root, compute_root_from_path, verify_path, LeafIndex, MerkleProof, SmtError,
    SparseMerkleTree, MAX_DEPTH,
};
