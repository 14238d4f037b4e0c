//! Events emitted for off-chain indexers
//!
//! The core never reads its own events back. Indexers drain the log and
//! maintain the global state tree and any nullifier bookkeeping themselves.

use super::gateway::ProofBlob;
use super::types::{Address, Attestation, AttesterId, EpochKey};
use crate::crypto::Scalar;
use crate::serialization::{to_json, SerializationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    UserSignedUp {
        epoch: u64,
        identity_commitment: Scalar,
    },
    /// A leaf the off-chain global state tree must append.
    NewGstLeafInserted {
        epoch: u64,
        leaf: Scalar,
        leaf_index: u64,
    },
    AttesterRegistered {
        address: Address,
        attester_id: AttesterId,
    },
    AttestationSubmitted {
        epoch: u64,
        epoch_key: EpochKey,
        attester: Address,
        attestation: Attestation,
    },
    /// Progress of one transition step.
    EpochKeysSealed {
        epoch: u64,
        sealed_now: usize,
        num_sealed: usize,
        total: usize,
    },
    EpochEnded {
        epoch: u64,
    },
    UserStateTransitioned {
        epoch: u64,
        from_epoch: u64,
        new_leaf: Scalar,
        attestation_nullifiers: Vec<Scalar>,
        epoch_key_nullifiers: Vec<Scalar>,
        from_global_state_tree: Scalar,
        from_epoch_tree: Scalar,
        from_nullifier_tree: Scalar,
        proof: ProofBlob,
    },
}

/// Append-only event buffer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: ProtocolEvent) {
        tracing::trace!(?event, "event emitted");
        self.events.push(event);
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Hand all buffered events to the caller and clear the buffer.
    pub fn drain(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// One JSON object per line, in emission order.
    pub fn to_json_lines(&self) -> Result<String, SerializationError> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&to_json(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}
