//! Attester registration
//!
//! Addresses map to incremental ids starting at 1. Ids are never reused and
//! never reassigned.

use super::error::{ProtocolError, ProtocolResult};
use super::types::{Address, AttesterId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Recovers the signer of a 32-byte message hash.
///
/// Production deployments plug in secp256k1 ECDSA recovery; tests use
/// `MockSignatureRecovery`.
pub trait SignatureRecovery: Send + Sync {
    /// `None` if the signature is malformed or recovery fails.
    fn recover(&self, message_hash: &[u8; 32], signature: &[u8]) -> Option<Address>;
}

/// Message a relayed attester signs: `sha256(attester || contract)`.
pub fn registration_message_hash(attester: &Address, contract_address: &Address) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(attester.as_bytes());
    hasher.update(contract_address.as_bytes());
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttesterRegistry {
    attesters: BTreeMap<Address, AttesterId>,
    next_attester_id: u64,
}

impl Default for AttesterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AttesterRegistry {
    pub fn new() -> Self {
        Self {
            attesters: BTreeMap::new(),
            next_attester_id: 1,
        }
    }

    pub fn register(&mut self, address: Address) -> ProtocolResult<AttesterId> {
        if self.attesters.contains_key(&address) {
            return Err(ProtocolError::AlreadyRegistered { address });
        }

        let id = AttesterId(self.next_attester_id);
        self.next_attester_id += 1;
        self.attesters.insert(address, id);
        Ok(id)
    }

    /// Register `attester` on a relayer's behalf once `signature` proves the
    /// attester signed `(attester, contract_address)`.
    pub fn register_via_relayer(
        &mut self,
        attester: Address,
        contract_address: &Address,
        signature: &[u8],
        recovery: &dyn SignatureRecovery,
    ) -> ProtocolResult<AttesterId> {
        let message_hash = registration_message_hash(&attester, contract_address);
        if recovery.recover(&message_hash, signature) != Some(attester) {
            return Err(ProtocolError::InvalidSignature { attester });
        }
        self.register(attester)
    }

    /// `AttesterId::UNREGISTERED` for unknown addresses.
    pub fn id_of(&self, address: &Address) -> AttesterId {
        self.attesters
            .get(address)
            .copied()
            .unwrap_or(AttesterId::UNREGISTERED)
    }

    pub fn num_attesters(&self) -> usize {
        self.attesters.len()
    }

    /// Ids must be distinct and below the next id to hand out.
    pub fn check_consistent(&self) -> Result<(), String> {
        if self.next_attester_id == 0 || self.next_attester_id == u64::MAX {
            return Err(format!("next attester id {}", self.next_attester_id));
        }
        let mut seen = BTreeSet::new();
        for (address, id) in &self.attesters {
            if !id.is_registered() || id.0 >= self.next_attester_id || !seen.insert(*id) {
                return Err(format!("attester {address} has invalid id {id}"));
            }
        }
        Ok(())
    }
}
