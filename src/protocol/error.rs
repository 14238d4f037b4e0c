//! Protocol errors
//!
//! Every failure is a named precondition violation raised before any state is
//! touched. Proof verdicts are NOT errors: `verify_*` return `Ok(false)`.

use super::types::{Address, AttesterId, EpochKey};
use crate::serialization::SerializationError;
use crate::smt::SmtError;
use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    // Capacity / uniqueness
    #[error("identity commitment already signed up")]
    AlreadySignedUp,

    #[error("user capacity exceeded: {max_users} sign-ups allowed")]
    CapacityExceeded { max_users: u64 },

    #[error("attester {address} already registered")]
    AlreadyRegistered { address: Address },

    // Authorization
    #[error("{address} is not a registered attester")]
    NotAnAttester { address: Address },

    #[error("attestation claims attester id {claimed}, caller is attester {caller}")]
    AttesterIdMismatch {
        caller: AttesterId,
        claimed: AttesterId,
    },

    #[error("signature does not recover to attester {attester}")]
    InvalidSignature { attester: Address },

    // State machine
    #[error("epoch key {epoch_key} already sealed in epoch {epoch}")]
    KeySealed { epoch: u64, epoch_key: EpochKey },

    #[error("attester {attester_id} already attested to epoch key {epoch_key} this epoch")]
    DuplicateAttestation {
        attester_id: AttesterId,
        epoch_key: EpochKey,
    },

    #[error("epoch key {epoch_key} reached its cap of {cap} attestations")]
    KeyCapacityExceeded { epoch_key: EpochKey, cap: u64 },

    #[error("epoch not ended: {remaining_secs}s remaining")]
    EpochNotEnded { remaining_secs: u64 },

    #[error("cannot transition from epoch {from_epoch}: current epoch is {current_epoch}")]
    InvalidTransitionEpoch { from_epoch: u64, current_epoch: u64 },

    #[error("epoch {epoch} is not sealed yet")]
    EpochNotSealed { epoch: u64 },

    // Arity / range
    #[error("expected {expected} {kind} nullifiers, got {got}")]
    NullifierArity {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("attestation field {field} is not a valid field element")]
    ValueOutOfField { field: &'static str },

    #[error("public signal #{index} is not a valid field element")]
    SignalOutOfField { index: usize },

    #[error("epoch key {epoch_key} does not fit an epoch tree of depth {depth}")]
    EpochKeyOutOfRange { epoch_key: EpochKey, depth: u8 },

    #[error(transparent)]
    Tree(#[from] SmtError),

    // Economic
    #[error("incorrect attesting fee: expected {expected}, got {got}")]
    IncorrectFee { expected: u64, got: u64 },

    // Setup / persistence
    #[error("invalid protocol configuration: {0}")]
    InvalidConfig(String),

    #[error("inconsistent protocol state: {0}")]
    CorruptState(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
