//! User admission and global state tree leaves
//!
//! The registry never stores GST nodes. It remembers which identity
//! commitments signed up, counts them, and hands out leaves plus a running
//! leaf index for the off-chain tree to append.

use super::error::{ProtocolError, ProtocolResult};
use crate::crypto::{hash_left_right, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// GST leaf: `H(identity_commitment, user_state_root)`.
pub fn gst_leaf(identity_commitment: &Scalar, user_state_root: &Scalar) -> Scalar {
    hash_left_right(identity_commitment, user_state_root)
}

/// A freshly emitted GST leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GstLeaf {
    pub leaf: Scalar,
    pub leaf_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRegistry {
    max_users: u64,
    empty_user_state_root: Scalar,
    signed_up: BTreeSet<Scalar>,
    num_sign_ups: u64,
    /// Leaves emitted so far (sign-ups and state transitions).
    next_leaf_index: u64,
}

impl IdentityRegistry {
    /// `empty_user_state_root` is computed once at start-up (root of an
    /// all-zero user state tree) and used for every sign-up leaf.
    pub fn new(max_users: u64, empty_user_state_root: Scalar) -> Self {
        Self {
            max_users,
            empty_user_state_root,
            signed_up: BTreeSet::new(),
            num_sign_ups: 0,
            next_leaf_index: 0,
        }
    }

    /// Admit a user and emit its initial GST leaf.
    pub fn sign_up(&mut self, identity_commitment: Scalar) -> ProtocolResult<GstLeaf> {
        if self.signed_up.contains(&identity_commitment) {
            return Err(ProtocolError::AlreadySignedUp);
        }
        if self.num_sign_ups >= self.max_users {
            return Err(ProtocolError::CapacityExceeded {
                max_users: self.max_users,
            });
        }
        if !identity_commitment.is_in_field() {
            return Err(ProtocolError::ValueOutOfField {
                field: "identity_commitment",
            });
        }

        self.signed_up.insert(identity_commitment);
        self.num_sign_ups += 1;
        let leaf = gst_leaf(&identity_commitment, &self.empty_user_state_root);
        Ok(self.push_leaf(leaf))
    }

    /// Assign the next leaf index to a leaf produced by a state transition.
    pub fn insert_transition_leaf(&mut self, leaf: Scalar) -> GstLeaf {
        self.push_leaf(leaf)
    }

    fn push_leaf(&mut self, leaf: Scalar) -> GstLeaf {
        let leaf_index = self.next_leaf_index;
        self.next_leaf_index += 1;
        GstLeaf { leaf, leaf_index }
    }

    pub fn has_signed_up(&self, identity_commitment: &Scalar) -> bool {
        self.signed_up.contains(identity_commitment)
    }

    pub fn num_sign_ups(&self) -> u64 {
        self.num_sign_ups
    }

    pub fn num_gst_leaves(&self) -> u64 {
        self.next_leaf_index
    }

    pub fn empty_user_state_root(&self) -> Scalar {
        self.empty_user_state_root
    }

    pub fn max_users(&self) -> u64 {
        self.max_users
    }

    /// Check the counters of a registry decoded from a snapshot.
    pub fn check_consistent(&self) -> Result<(), String> {
        if self.num_sign_ups != self.signed_up.len() as u64 {
            return Err(format!(
                "{} sign-ups counted for {} commitments",
                self.num_sign_ups,
                self.signed_up.len()
            ));
        }
        if self.num_sign_ups > self.max_users {
            return Err(format!(
                "{} sign-ups exceed max_users {}",
                self.num_sign_ups, self.max_users
            ));
        }
        if self.next_leaf_index < self.num_sign_ups || self.next_leaf_index == u64::MAX {
            return Err(format!(
                "leaf index {} inconsistent with {} sign-ups",
                self.next_leaf_index, self.num_sign_ups
            ));
        }
        if let Some(commitment) = self.signed_up.iter().find(|c| !c.is_in_field()) {
            return Err(format!("commitment {commitment} outside the field"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_users: u64) -> IdentityRegistry {
        IdentityRegistry::new(max_users, Scalar::from_u64(77))
    }

    #[test]
    fn test_sign_up_emits_leaf() {
        let mut reg = registry(10);
        let idc = Scalar::from_u64(1);
        let leaf = reg.sign_up(idc).unwrap();

        assert_eq!(leaf.leaf, gst_leaf(&idc, &Scalar::from_u64(77)));
        assert_eq!(leaf.leaf_index, 0);
        assert_eq!(reg.num_sign_ups(), 1);
        assert!(reg.has_signed_up(&idc));
    }

    #[test]
    fn test_double_sign_up_rejected() {
        let mut reg = registry(10);
        reg.sign_up(Scalar::from_u64(1)).unwrap();
        assert!(matches!(
            reg.sign_up(Scalar::from_u64(1)),
            Err(ProtocolError::AlreadySignedUp)
        ));
        assert_eq!(reg.num_sign_ups(), 1);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut reg = registry(2);
        reg.sign_up(Scalar::from_u64(1)).unwrap();
        reg.sign_up(Scalar::from_u64(2)).unwrap();
        assert!(matches!(
            reg.sign_up(Scalar::from_u64(3)),
            Err(ProtocolError::CapacityExceeded { max_users: 2 })
        ));
        assert_eq!(reg.num_sign_ups(), 2);
    }

    #[test]
    fn test_duplicate_checked_before_capacity() {
        let mut reg = registry(1);
        reg.sign_up(Scalar::from_u64(1)).unwrap();
        assert!(matches!(
            reg.sign_up(Scalar::from_u64(1)),
            Err(ProtocolError::AlreadySignedUp)
        ));
    }

    #[test]
    fn test_out_of_field_commitment_rejected() {
        let mut reg = registry(5);
        assert!(matches!(
            reg.sign_up(Scalar::MODULUS),
            Err(ProtocolError::ValueOutOfField { .. })
        ));
        assert_eq!(reg.num_sign_ups(), 0);
    }

    #[test]
    fn test_leaf_indices_shared_with_transitions() {
        let mut reg = registry(5);
        reg.sign_up(Scalar::from_u64(1)).unwrap();
        let transition = reg.insert_transition_leaf(Scalar::from_u64(99));
        let second = reg.sign_up(Scalar::from_u64(2)).unwrap();

        assert_eq!(transition.leaf_index, 1);
        assert_eq!(second.leaf_index, 2);
        assert_eq!(reg.num_gst_leaves(), 3);
        assert_eq!(reg.num_sign_ups(), 2);
    }

    #[test]
    fn test_consistency_check() {
        let mut reg = registry(2);
        reg.sign_up(Scalar::from_u64(1)).unwrap();
        assert!(reg.check_consistent().is_ok());

        let mut miscounted = reg.clone();
        miscounted.num_sign_ups = 2;
        assert!(miscounted.check_consistent().is_err());

        let mut over_capacity = reg.clone();
        over_capacity.max_users = 0;
        assert!(over_capacity.check_consistent().is_err());

        let mut rewound = reg.clone();
        rewound.next_leaf_index = 0;
        assert!(rewound.check_consistent().is_err());
    }
}
