//! Test doubles for the core's external collaborators.
//!
//! All mocks are cheap to clone and share state between clones, so a test can
//! hand one clone to the core and keep another to drive or inspect it.

use super::attester::{registration_message_hash, SignatureRecovery};
use super::epoch::Clock;
use super::gateway::{Groth16Proof, ProofVerifier};
use super::types::Address;
use crate::crypto::Scalar;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofKind {
    EpochKey,
    UserStateTransition,
    Reputation,
}

#[derive(Debug, Default)]
struct VerifierState {
    verdict: bool,
    calls: HashMap<ProofKind, usize>,
    last_public_signals: Option<Vec<Scalar>>,
}

/// Verifier returning a fixed verdict and recording every call.
#[derive(Debug, Clone, Default)]
pub struct MockVerifier {
    state: Arc<Mutex<VerifierState>>,
}

impl MockVerifier {
    pub fn new(verdict: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(VerifierState {
                verdict,
                ..VerifierState::default()
            })),
        }
    }

    pub fn accepting() -> Self {
        Self::new(true)
    }

    pub fn rejecting() -> Self {
        Self::new(false)
    }

    pub fn set_verdict(&self, verdict: bool) {
        lock(&self.state).verdict = verdict;
    }

    pub fn calls(&self, kind: ProofKind) -> usize {
        lock(&self.state).calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.state).calls.values().sum()
    }

    pub fn last_public_signals(&self) -> Option<Vec<Scalar>> {
        lock(&self.state).last_public_signals.clone()
    }

    fn record(&self, kind: ProofKind, public_signals: &[Scalar]) -> bool {
        let mut state = lock(&self.state);
        *state.calls.entry(kind).or_default() += 1;
        state.last_public_signals = Some(public_signals.to_vec());
        state.verdict
    }
}

impl ProofVerifier for MockVerifier {
    fn verify_epoch_key(&self, _proof: &Groth16Proof, public_signals: &[Scalar]) -> bool {
        self.record(ProofKind::EpochKey, public_signals)
    }

    fn verify_user_state_transition(
        &self,
        _proof: &Groth16Proof,
        public_signals: &[Scalar],
    ) -> bool {
        self.record(ProofKind::UserStateTransition, public_signals)
    }

    fn verify_reputation(&self, _proof: &Groth16Proof, public_signals: &[Scalar]) -> bool {
        self.record(ProofKind::Reputation, public_signals)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Signature scheme where a "signature" is `message_hash || signer`.
///
/// Recovery returns the embedded signer only when the embedded hash matches
/// the message being checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSignatureRecovery;

impl MockSignatureRecovery {
    pub fn new() -> Self {
        Self
    }

    /// Produce `signer`'s signature over a relayed registration.
    pub fn sign(&self, signer: &Address, contract_address: &Address) -> Vec<u8> {
        let mut signature = registration_message_hash(signer, contract_address).to_vec();
        signature.extend_from_slice(signer.as_bytes());
        signature
    }
}

impl SignatureRecovery for MockSignatureRecovery {
    fn recover(&self, message_hash: &[u8; 32], signature: &[u8]) -> Option<Address> {
        let (hash, signer) = signature.split_at_checked(32)?;
        if hash != message_hash {
            return None;
        }
        Address::from_slice(signer)
    }
}
