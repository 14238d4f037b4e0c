//! Proof gateway
//!
//! Assembles public signals, range-checks them, unpacks the proof blob and
//! asks the injected verifier for a verdict. Nothing is cached; every call
//! reaches the verifier unless a precondition rejects it first.

use super::error::{ProtocolError, ProtocolResult};
use super::types::{AttesterId, EpochKey};
use crate::crypto::Scalar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Flattened Groth16 proof: `[a.x, a.y, b.x0, b.x1, b.y0, b.y1, c.x, c.y]`.
pub type ProofBlob = [Scalar; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct G1Point {
    pub x: Scalar,
    pub y: Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct G2Point {
    pub x: [Scalar; 2],
    pub y: [Scalar; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub a: G1Point,
    pub b: G2Point,
    pub c: G1Point,
}

impl Groth16Proof {
    pub fn unpack(blob: &ProofBlob) -> Self {
        Self {
            a: G1Point {
                x: blob[0],
                y: blob[1],
            },
            b: G2Point {
                x: [blob[2], blob[3]],
                y: [blob[4], blob[5]],
            },
            c: G1Point {
                x: blob[6],
                y: blob[7],
            },
        }
    }

    pub fn pack(&self) -> ProofBlob {
        [
            self.a.x, self.a.y, self.b.x[0], self.b.x[1], self.b.y[0], self.b.y[1], self.c.x,
            self.c.y,
        ]
    }
}

/// Pairing check for each proof kind.
///
/// Implementations hold the verification keys; the gateway only supplies
/// the unpacked proof and the ordered public signals.
pub trait ProofVerifier: Send + Sync {
    fn verify_epoch_key(&self, proof: &Groth16Proof, public_signals: &[Scalar]) -> bool;

    fn verify_user_state_transition(
        &self,
        proof: &Groth16Proof,
        public_signals: &[Scalar],
    ) -> bool;

    fn verify_reputation(&self, proof: &Groth16Proof, public_signals: &[Scalar]) -> bool;
}

/// Claim that `epoch_key` is a valid key of a user in the GST at `gst_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochKeyInput {
    pub global_state_tree: Scalar,
    pub epoch: u64,
    pub epoch_key: EpochKey,
    pub proof: ProofBlob,
}

impl EpochKeyInput {
    pub fn public_signals(&self) -> Vec<Scalar> {
        vec![
            self.global_state_tree,
            Scalar::from_u64(self.epoch),
            self.epoch_key.0,
        ]
    }
}

/// A user's move from `transition_from_epoch` into the current epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStateTransitionInput {
    pub new_global_state_tree_leaf: Scalar,
    pub attestation_nullifiers: Vec<Scalar>,
    pub epoch_key_nullifiers: Vec<Scalar>,
    pub transition_from_epoch: u64,
    pub from_global_state_tree: Scalar,
    pub from_epoch_tree: Scalar,
    pub from_nullifier_tree: Scalar,
    pub proof: ProofBlob,
}

impl UserStateTransitionInput {
    pub fn public_signals(&self) -> Vec<Scalar> {
        let mut signals = Vec::with_capacity(
            5 + self.attestation_nullifiers.len() + self.epoch_key_nullifiers.len(),
        );
        signals.push(self.new_global_state_tree_leaf);
        signals.extend_from_slice(&self.attestation_nullifiers);
        signals.extend_from_slice(&self.epoch_key_nullifiers);
        signals.push(Scalar::from_u64(self.transition_from_epoch));
        signals.push(self.from_global_state_tree);
        signals.push(self.from_epoch_tree);
        signals.push(self.from_nullifier_tree);
        signals
    }
}

/// Claim of at least `min_pos_rep` and at most `max_neg_rep` from one attester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationInput {
    pub epoch: u64,
    pub global_state_tree: Scalar,
    pub nullifier_tree: Scalar,
    pub attester_id: AttesterId,
    pub min_pos_rep: Scalar,
    pub max_neg_rep: Scalar,
    pub graffiti_pre_image: Scalar,
    pub proof: ProofBlob,
}

impl ReputationInput {
    pub fn public_signals(&self) -> Vec<Scalar> {
        vec![
            Scalar::from_u64(self.epoch),
            self.global_state_tree,
            self.nullifier_tree,
            self.attester_id.to_scalar(),
            self.min_pos_rep,
            self.max_neg_rep,
            self.graffiti_pre_image,
        ]
    }
}

/// Reject the first signal outside the scalar field.
pub fn check_signals(signals: &[Scalar]) -> ProtocolResult<()> {
    match signals.iter().position(|signal| !signal.is_in_field()) {
        Some(index) => Err(ProtocolError::SignalOutOfField { index }),
        None => Ok(()),
    }
}

#[derive(Clone)]
pub struct ProofGateway {
    verifier: Arc<dyn ProofVerifier>,
    num_attestations_per_epoch: usize,
    num_epoch_key_nonce_per_epoch: usize,
}

impl ProofGateway {
    pub fn new(
        verifier: Arc<dyn ProofVerifier>,
        num_attestations_per_epoch: usize,
        num_epoch_key_nonce_per_epoch: usize,
    ) -> Self {
        Self {
            verifier,
            num_attestations_per_epoch,
            num_epoch_key_nonce_per_epoch,
        }
    }

    pub fn verify_epoch_key_validity(&self, input: &EpochKeyInput) -> ProtocolResult<bool> {
        let signals = input.public_signals();
        check_signals(&signals)?;

        let verdict = self
            .verifier
            .verify_epoch_key(&Groth16Proof::unpack(&input.proof), &signals);
        tracing::debug!(epoch = input.epoch, verdict, "epoch key proof checked");
        Ok(verdict)
    }

    /// Everything a transition must satisfy before its proof is looked at.
    pub fn check_user_state_transition(
        &self,
        input: &UserStateTransitionInput,
        current_epoch: u64,
    ) -> ProtocolResult<Vec<Scalar>> {
        if input.transition_from_epoch >= current_epoch {
            return Err(ProtocolError::InvalidTransitionEpoch {
                from_epoch: input.transition_from_epoch,
                current_epoch,
            });
        }
        if input.attestation_nullifiers.len() != self.num_attestations_per_epoch {
            return Err(ProtocolError::NullifierArity {
                kind: "attestation",
                expected: self.num_attestations_per_epoch,
                got: input.attestation_nullifiers.len(),
            });
        }
        if input.epoch_key_nullifiers.len() != self.num_epoch_key_nonce_per_epoch {
            return Err(ProtocolError::NullifierArity {
                kind: "epoch key",
                expected: self.num_epoch_key_nonce_per_epoch,
                got: input.epoch_key_nullifiers.len(),
            });
        }

        let signals = input.public_signals();
        check_signals(&signals)?;
        Ok(signals)
    }

    pub fn verify_user_state_transition(
        &self,
        input: &UserStateTransitionInput,
        current_epoch: u64,
    ) -> ProtocolResult<bool> {
        let signals = self.check_user_state_transition(input, current_epoch)?;

        let verdict = self
            .verifier
            .verify_user_state_transition(&Groth16Proof::unpack(&input.proof), &signals);
        tracing::debug!(
            from_epoch = input.transition_from_epoch,
            verdict,
            "user state transition proof checked"
        );
        Ok(verdict)
    }

    pub fn verify_reputation(&self, input: &ReputationInput) -> ProtocolResult<bool> {
        let signals = input.public_signals();
        check_signals(&signals)?;

        let verdict = self
            .verifier
            .verify_reputation(&Groth16Proof::unpack(&input.proof), &signals);
        tracing::debug!(
            epoch = input.epoch,
            attester_id = input.attester_id.0,
            verdict,
            "reputation proof checked"
        );
        Ok(verdict)
    }

    pub fn num_attestations_per_epoch(&self) -> usize {
        self.num_attestations_per_epoch
    }

    pub fn num_epoch_key_nonce_per_epoch(&self) -> usize {
        self.num_epoch_key_nonce_per_epoch
    }
}

impl std::fmt::Debug for ProofGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofGateway")
            .field("num_attestations_per_epoch", &self.num_attestations_per_epoch)
            .field(
                "num_epoch_key_nonce_per_epoch",
                &self.num_epoch_key_nonce_per_epoch,
            )
            .finish_non_exhaustive()
    }
}
