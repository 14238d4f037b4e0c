//! Epoch-based reputation state machine
//!
//! [`ReputationCore`] owns every piece of mutable protocol state and is the
//! only writer. Each operation either applies fully or returns an error
//! without touching state. Cryptographic checks, time and signature recovery
//! are injected collaborators ([`ExternalDeps`]).
//!
//! ## Flow
//!
//! 1. Users sign up; each sign-up emits a global state tree (GST) leaf.
//! 2. Attesters register and attest to epoch keys. Attestations fold into
//!    per-key hashchains.
//! 3. Once the epoch length elapses, anyone calls
//!    [`ReputationCore::begin_epoch_transition`] repeatedly. Each call seals a
//!    bounded number of keys; the last one advances the epoch.
//! 4. The sealed `(epoch key, hashchain)` pairs form the epoch tree, whose
//!    root users prove against when transitioning their state.

pub mod attester;
pub mod epoch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod mock;
pub mod types;

#[cfg(test)]
mod proptests;

pub use attester::{AttesterRegistry, SignatureRecovery};
pub use epoch::{Clock, EpochManager, SystemClock, TransitionOutcome};
pub use error::{ProtocolError, ProtocolResult};
pub use events::{EventLog, ProtocolEvent};
pub use gateway::{
    EpochKeyInput, Groth16Proof, ProofBlob, ProofGateway, ProofVerifier, ReputationInput,
    UserStateTransitionInput,
};
pub use identity::{GstLeaf, IdentityRegistry};
pub use ledger::{AttestationLedger, LedgerLimits, SealProgress};
pub use types::{Address, Attestation, AttesterId, EpochKey};

use crate::config::ProtocolConfig;
use crate::crypto::Scalar;
use crate::serialization::{from_cbor, to_cbor};
use crate::smt::{compute_root, LeafIndex, SparseMerkleTree};
use ledger::Submission;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default leaf of epoch trees and user state trees.
pub const DEFAULT_LEAF: Scalar = Scalar::ZERO;

/// Collaborators supplied by the embedding environment.
#[derive(Clone)]
pub struct ExternalDeps {
    /// Address the core is deployed at; bound into relayed registrations.
    pub contract_address: Address,
    pub verifier: Arc<dyn ProofVerifier>,
    pub clock: Arc<dyn Clock>,
    pub signatures: Arc<dyn SignatureRecovery>,
}

/// Everything that survives a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub config: ProtocolConfig,
    pub identities: IdentityRegistry,
    pub attesters: AttesterRegistry,
    pub ledger: AttestationLedger,
    pub epochs: EpochManager,
}

impl ProtocolState {
    /// Fresh state at epoch 1, with the epoch timer started at `now`.
    pub fn new(config: ProtocolConfig, now: u64) -> ProtocolResult<Self> {
        config
            .validate()
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;

        let empty_user_state_root =
            SparseMerkleTree::empty_root(config.user_state_tree_depth, DEFAULT_LEAF)?;

        Ok(Self {
            identities: IdentityRegistry::new(config.max_users, empty_user_state_root),
            attesters: AttesterRegistry::new(),
            ledger: AttestationLedger::new(LedgerLimits {
                max_attestations_per_epoch_key: config.max_attestations_per_epoch_key,
                attesting_fee: config.attesting_fee,
                epoch_tree_depth: config.epoch_tree_depth,
            }),
            epochs: EpochManager::new(
                config.epoch_length,
                config.transition_compensation_per_key,
                now,
            ),
            config,
        })
    }

    /// Check that decoded state could have been produced by this crate.
    ///
    /// Components must agree with `config`, and each keeps its own counters
    /// and cursors in range.
    pub fn validate(&self) -> ProtocolResult<()> {
        self.config
            .validate()
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;

        let expected_limits = LedgerLimits {
            max_attestations_per_epoch_key: self.config.max_attestations_per_epoch_key,
            attesting_fee: self.config.attesting_fee,
            epoch_tree_depth: self.config.epoch_tree_depth,
        };
        if *self.ledger.limits() != expected_limits {
            return Err(corrupt("ledger limits differ from the configuration"));
        }
        if self.epochs.epoch_length() != self.config.epoch_length
            || self.epochs.compensation_per_key() != self.config.transition_compensation_per_key
        {
            return Err(corrupt("epoch timing differs from the configuration"));
        }
        if self.identities.max_users() != self.config.max_users {
            return Err(corrupt("max_users differs from the configuration"));
        }
        let empty_user_state_root =
            SparseMerkleTree::empty_root(self.config.user_state_tree_depth, DEFAULT_LEAF)?;
        if self.identities.empty_user_state_root() != empty_user_state_root {
            return Err(corrupt("empty user state root does not match its tree depth"));
        }

        let current_epoch = self.epochs.current_epoch();
        if current_epoch == 0 || current_epoch == u64::MAX {
            return Err(corrupt(&format!("current epoch {current_epoch}")));
        }
        self.identities.check_consistent().map_err(ProtocolError::CorruptState)?;
        self.attesters.check_consistent().map_err(ProtocolError::CorruptState)?;
        self.ledger
            .check_consistent(current_epoch)
            .map_err(ProtocolError::CorruptState)?;
        Ok(())
    }
}

fn corrupt(message: &str) -> ProtocolError {
    ProtocolError::CorruptState(message.to_string())
}

pub struct ReputationCore {
    state: ProtocolState,
    gateway: ProofGateway,
    clock: Arc<dyn Clock>,
    signatures: Arc<dyn SignatureRecovery>,
    contract_address: Address,
    events: EventLog,
}

impl ReputationCore {
    pub fn new(config: ProtocolConfig, deps: ExternalDeps) -> ProtocolResult<Self> {
        let state = ProtocolState::new(config, deps.clock.now())?;
        tracing::info!(
            contract = %deps.contract_address,
            epoch_length = state.config.epoch_length,
            max_users = state.config.max_users,
            "reputation core initialized"
        );
        Self::from_state(state, deps)
    }

    /// Rebuild a core from [`ReputationCore::snapshot`] bytes.
    pub fn restore(bytes: &[u8], deps: ExternalDeps) -> ProtocolResult<Self> {
        let state: ProtocolState = from_cbor(bytes)?;
        state.validate()?;
        tracing::info!(
            epoch = state.epochs.current_epoch(),
            sign_ups = state.identities.num_sign_ups(),
            "reputation core restored"
        );
        Self::from_state(state, deps)
    }

    fn from_state(state: ProtocolState, deps: ExternalDeps) -> ProtocolResult<Self> {
        let num_attestations = state
            .config
            .num_attestations_per_epoch()
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        let num_nonces = usize::try_from(state.config.num_epoch_key_nonce_per_epoch)
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            gateway: ProofGateway::new(deps.verifier, num_attestations, num_nonces),
            clock: deps.clock,
            signatures: deps.signatures,
            contract_address: deps.contract_address,
            events: EventLog::new(),
            state,
        })
    }

    /// Serialize all protocol state (not the event buffer) to CBOR.
    pub fn snapshot(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(&self.state)?)
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.state.config
    }

    // ------------------------------------------------------------------
    // Sign-up
    // ------------------------------------------------------------------

    pub fn user_sign_up(&mut self, identity_commitment: Scalar) -> ProtocolResult<GstLeaf> {
        let epoch = self.current_epoch();
        let leaf = self.state.identities.sign_up(identity_commitment)?;

        self.events.emit(ProtocolEvent::UserSignedUp {
            epoch,
            identity_commitment,
        });
        self.events.emit(ProtocolEvent::NewGstLeafInserted {
            epoch,
            leaf: leaf.leaf,
            leaf_index: leaf.leaf_index,
        });
        tracing::info!(
            epoch,
            leaf_index = leaf.leaf_index,
            sign_ups = self.state.identities.num_sign_ups(),
            "user signed up"
        );
        Ok(leaf)
    }

    pub fn attester_sign_up(&mut self, caller: Address) -> ProtocolResult<AttesterId> {
        let attester_id = self.state.attesters.register(caller)?;
        self.record_attester(caller, attester_id);
        Ok(attester_id)
    }

    /// Register `attester` from a relayed signature over
    /// `(attester, contract address)`.
    pub fn attester_sign_up_via_relayer(
        &mut self,
        attester: Address,
        signature: &[u8],
    ) -> ProtocolResult<AttesterId> {
        let attester_id = self.state.attesters.register_via_relayer(
            attester,
            &self.contract_address,
            signature,
            self.signatures.as_ref(),
        )?;
        self.record_attester(attester, attester_id);
        Ok(attester_id)
    }

    fn record_attester(&mut self, address: Address, attester_id: AttesterId) {
        self.events.emit(ProtocolEvent::AttesterRegistered {
            address,
            attester_id,
        });
        tracing::info!(%address, %attester_id, "attester registered");
    }

    // ------------------------------------------------------------------
    // Attestations and epochs
    // ------------------------------------------------------------------

    /// Record `attestation` for `epoch_key` in the current epoch and return
    /// the key's new hashchain.
    pub fn submit_attestation(
        &mut self,
        caller: Address,
        attestation: Attestation,
        epoch_key: EpochKey,
        fee: u64,
    ) -> ProtocolResult<Scalar> {
        let epoch = self.current_epoch();
        let hashchain = self.state.ledger.submit(Submission {
            epoch,
            caller,
            caller_id: self.state.attesters.id_of(&caller),
            attestation: &attestation,
            epoch_key,
            fee,
        })?;

        self.events.emit(ProtocolEvent::AttestationSubmitted {
            epoch,
            epoch_key,
            attester: caller,
            attestation,
        });
        tracing::debug!(
            epoch,
            %epoch_key,
            attester_id = %attestation.attester_id,
            "attestation submitted"
        );
        Ok(hashchain)
    }

    /// Seal up to `max_keys_to_seal` keys of the current epoch; advances the
    /// epoch once all of its keys are sealed.
    pub fn begin_epoch_transition(
        &mut self,
        caller: Address,
        max_keys_to_seal: usize,
    ) -> ProtocolResult<TransitionOutcome> {
        let now = self.clock.now();
        let outcome = self.state.epochs.begin_transition(
            &mut self.state.ledger,
            caller,
            max_keys_to_seal,
            now,
        )?;

        let SealProgress {
            sealed_now,
            num_sealed,
            total,
        } = outcome.progress;
        self.events.emit(ProtocolEvent::EpochKeysSealed {
            epoch: outcome.epoch,
            sealed_now,
            num_sealed,
            total,
        });
        tracing::info!(
            epoch = outcome.epoch,
            sealed_now,
            num_sealed,
            total,
            "sealed epoch keys"
        );

        if outcome.epoch_advanced {
            self.events.emit(ProtocolEvent::EpochEnded {
                epoch: outcome.epoch,
            });
            tracing::info!(
                epoch = outcome.epoch,
                next_epoch = self.current_epoch(),
                "epoch ended"
            );
        }
        Ok(outcome)
    }

    /// Pay out the caller's accumulated transition compensation.
    pub fn collect_compensation(&mut self, caller: &Address) -> u64 {
        let amount = self.state.epochs.collect_compensation(caller);
        if amount > 0 {
            tracing::info!(%caller, amount, "compensation collected");
        }
        amount
    }

    /// Accept a user state transition: checks its public signals and emits
    /// the new GST leaf together with the consumed nullifiers.
    ///
    /// The proof itself is checked by whoever consumes the emitted event,
    /// via [`ReputationCore::verify_user_state_transition`].
    pub fn update_user_state_root(
        &mut self,
        input: UserStateTransitionInput,
    ) -> ProtocolResult<GstLeaf> {
        let epoch = self.current_epoch();
        self.gateway.check_user_state_transition(&input, epoch)?;

        let leaf = self
            .state
            .identities
            .insert_transition_leaf(input.new_global_state_tree_leaf);

        tracing::info!(
            epoch,
            from_epoch = input.transition_from_epoch,
            leaf_index = leaf.leaf_index,
            "user state transitioned"
        );
        self.events.emit(ProtocolEvent::UserStateTransitioned {
            epoch,
            from_epoch: input.transition_from_epoch,
            new_leaf: input.new_global_state_tree_leaf,
            attestation_nullifiers: input.attestation_nullifiers,
            epoch_key_nullifiers: input.epoch_key_nullifiers,
            from_global_state_tree: input.from_global_state_tree,
            from_epoch_tree: input.from_epoch_tree,
            from_nullifier_tree: input.from_nullifier_tree,
            proof: input.proof,
        });
        self.events.emit(ProtocolEvent::NewGstLeafInserted {
            epoch,
            leaf: leaf.leaf,
            leaf_index: leaf.leaf_index,
        });
        Ok(leaf)
    }

    // ------------------------------------------------------------------
    // Proof verification
    // ------------------------------------------------------------------

    pub fn verify_epoch_key_validity(&self, input: &EpochKeyInput) -> ProtocolResult<bool> {
        self.gateway.verify_epoch_key_validity(input)
    }

    pub fn verify_user_state_transition(
        &self,
        input: &UserStateTransitionInput,
    ) -> ProtocolResult<bool> {
        self.gateway
            .verify_user_state_transition(input, self.current_epoch())
    }

    pub fn verify_reputation(&self, input: &ReputationInput) -> ProtocolResult<bool> {
        self.gateway.verify_reputation(input)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current_epoch(&self) -> u64 {
        self.state.epochs.current_epoch()
    }

    pub fn latest_epoch_transition_time(&self) -> u64 {
        self.state.epochs.latest_transition_time()
    }

    /// Seconds until the current epoch may be ended.
    pub fn seconds_until_epoch_end(&self) -> u64 {
        self.state.epochs.seconds_remaining(self.clock.now())
    }

    pub fn num_sign_ups(&self) -> u64 {
        self.state.identities.num_sign_ups()
    }

    pub fn has_signed_up(&self, identity_commitment: &Scalar) -> bool {
        self.state.identities.has_signed_up(identity_commitment)
    }

    pub fn empty_user_state_root(&self) -> Scalar {
        self.state.identities.empty_user_state_root()
    }

    pub fn attester_id(&self, address: &Address) -> AttesterId {
        self.state.attesters.id_of(address)
    }

    pub fn num_epoch_keys(&self, epoch: u64) -> usize {
        self.state.ledger.num_epoch_keys(epoch)
    }

    pub fn num_sealed_epoch_keys(&self, epoch: u64) -> usize {
        self.state.ledger.num_sealed_epoch_keys(epoch)
    }

    pub fn epoch_key_at(&self, epoch: u64, index: usize) -> Option<EpochKey> {
        self.state.ledger.epoch_key_at(epoch, index)
    }

    pub fn hashchain(&self, epoch: u64, epoch_key: &EpochKey) -> Scalar {
        self.state.ledger.hashchain(epoch, epoch_key)
    }

    pub fn is_sealed(&self, epoch: u64, epoch_key: &EpochKey) -> bool {
        self.state.ledger.is_sealed(epoch, epoch_key)
    }

    pub fn collected_fees(&self) -> u128 {
        self.state.ledger.collected_fees()
    }

    pub fn compensation_of(&self, address: &Address) -> u64 {
        self.state.epochs.compensation_of(address)
    }

    /// Sealed `(epoch key, hashchain)` pairs of a past epoch.
    pub fn epoch_tree_leaves(&self, epoch: u64) -> ProtocolResult<Vec<(EpochKey, Scalar)>> {
        if epoch == 0 || epoch >= self.current_epoch() {
            return Err(ProtocolError::EpochNotSealed { epoch });
        }
        Ok(self.state.ledger.epoch_tree_leaves(epoch))
    }

    /// Materialised epoch tree of a past epoch, for proof generation.
    pub fn epoch_tree(&self, epoch: u64) -> ProtocolResult<SparseMerkleTree> {
        let leaves = self.indexed_epoch_tree_leaves(epoch)?;
        Ok(SparseMerkleTree::from_leaves(
            self.state.config.epoch_tree_depth,
            DEFAULT_LEAF,
            leaves,
        )?)
    }

    pub fn epoch_tree_root(&self, epoch: u64) -> ProtocolResult<Scalar> {
        let leaves = self.indexed_epoch_tree_leaves(epoch)?;
        Ok(compute_root(
            self.state.config.epoch_tree_depth,
            DEFAULT_LEAF,
            leaves,
        )?)
    }

    fn indexed_epoch_tree_leaves(&self, epoch: u64) -> ProtocolResult<Vec<(LeafIndex, Scalar)>> {
        let depth = self.state.config.epoch_tree_depth;
        self.epoch_tree_leaves(epoch)?
            .into_iter()
            .map(|(epoch_key, hashchain)| {
                epoch_key
                    .0
                    .to_index(depth)
                    .map(|index| (index, hashchain))
                    .ok_or(ProtocolError::EpochKeyOutOfRange { epoch_key, depth })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn events(&self) -> &[ProtocolEvent] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        self.events.drain()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }
}

impl std::fmt::Debug for ReputationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationCore")
            .field("contract_address", &self.contract_address)
            .field("current_epoch", &self.current_epoch())
            .field("num_sign_ups", &self.num_sign_ups())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::{ManualClock, MockSignatureRecovery, MockVerifier};

    const CONTRACT: Address = Address([0xcc; 20]);
    const ATTESTER: Address = Address([0xa1; 20]);
    const RELAYER: Address = Address([0xfe; 20]);

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            global_state_tree_depth: 4,
            user_state_tree_depth: 4,
            epoch_tree_depth: 8,
            max_users: 10,
            num_epoch_key_nonce_per_epoch: 2,
            max_attestations_per_epoch_key: 3,
            epoch_length: 100,
            attesting_fee: 0,
            transition_compensation_per_key: 1,
        }
    }

    fn core() -> (ReputationCore, ManualClock) {
        let clock = ManualClock::new(1_000);
        let deps = ExternalDeps {
            contract_address: CONTRACT,
            verifier: Arc::new(MockVerifier::accepting()),
            clock: Arc::new(clock.clone()),
            signatures: Arc::new(MockSignatureRecovery::new()),
        };
        (ReputationCore::new(config(), deps).unwrap(), clock)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let deps = ExternalDeps {
            contract_address: CONTRACT,
            verifier: Arc::new(MockVerifier::accepting()),
            clock: Arc::new(ManualClock::new(0)),
            signatures: Arc::new(MockSignatureRecovery::new()),
        };
        let bad = ProtocolConfig {
            epoch_length: 0,
            ..config()
        };
        assert!(matches!(
            ReputationCore::new(bad, deps),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sign_up_emits_events() {
        let (mut core, _) = core();
        let leaf = core.user_sign_up(Scalar::from_u64(42)).unwrap();

        assert_eq!(
            leaf.leaf,
            identity::gst_leaf(&Scalar::from_u64(42), &core.empty_user_state_root())
        );
        assert_eq!(
            core.events(),
            &[
                ProtocolEvent::UserSignedUp {
                    epoch: 1,
                    identity_commitment: Scalar::from_u64(42),
                },
                ProtocolEvent::NewGstLeafInserted {
                    epoch: 1,
                    leaf: leaf.leaf,
                    leaf_index: 0,
                },
            ]
        );
    }

    #[test]
    fn test_failed_operation_emits_nothing() {
        let (mut core, _) = core();
        let att = Attestation::new(AttesterId(1), 1, 0, Scalar::ZERO);
        assert!(core
            .submit_attestation(ATTESTER, att, EpochKey::from_u64(1), 0)
            .is_err());
        assert!(core.events().is_empty());
    }

    #[test]
    fn test_relayed_registration_uses_contract_address() {
        let (mut core, _) = core();
        let signature = MockSignatureRecovery::new().sign(&ATTESTER, &CONTRACT);

        let id = core
            .attester_sign_up_via_relayer(ATTESTER, &signature)
            .unwrap();
        assert_eq!(id, AttesterId(1));
        assert_eq!(core.attester_id(&ATTESTER), id);

        let foreign = MockSignatureRecovery::new().sign(&RELAYER, &Address([0x01; 20]));
        assert!(matches!(
            core.attester_sign_up_via_relayer(RELAYER, &foreign),
            Err(ProtocolError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_epoch_tree_only_for_past_epochs() {
        let (mut core, clock) = core();
        core.attester_sign_up(ATTESTER).unwrap();
        let att = Attestation::new(AttesterId(1), 4, 1, Scalar::ZERO);
        core.submit_attestation(ATTESTER, att, EpochKey::from_u64(9), 0)
            .unwrap();

        assert!(matches!(
            core.epoch_tree_root(1),
            Err(ProtocolError::EpochNotSealed { epoch: 1 })
        ));

        clock.advance(100);
        core.begin_epoch_transition(RELAYER, 10).unwrap();

        let tree = core.epoch_tree(1).unwrap();
        assert_eq!(tree.root(), core.epoch_tree_root(1).unwrap());
        assert_eq!(
            tree.get_leaf(9).unwrap(),
            core.hashchain(1, &EpochKey::from_u64(9))
        );
        assert!(core.epoch_tree_root(0).is_err());
    }

    #[test]
    fn test_transition_events_and_compensation() {
        let (mut core, clock) = core();
        core.attester_sign_up(ATTESTER).unwrap();
        for key in 0..3 {
            let att = Attestation::new(AttesterId(1), 1, 0, Scalar::ZERO);
            core.submit_attestation(ATTESTER, att, EpochKey::from_u64(key), 0)
                .unwrap();
        }
        core.drain_events();

        clock.advance(100);
        core.begin_epoch_transition(RELAYER, 2).unwrap();
        core.begin_epoch_transition(RELAYER, 2).unwrap();

        assert_eq!(
            core.drain_events(),
            vec![
                ProtocolEvent::EpochKeysSealed {
                    epoch: 1,
                    sealed_now: 2,
                    num_sealed: 2,
                    total: 3,
                },
                ProtocolEvent::EpochKeysSealed {
                    epoch: 1,
                    sealed_now: 1,
                    num_sealed: 3,
                    total: 3,
                },
                ProtocolEvent::EpochEnded { epoch: 1 },
            ]
        );
        assert_eq!(core.compensation_of(&RELAYER), 3);
        assert_eq!(core.collect_compensation(&RELAYER), 3);
        assert_eq!(core.compensation_of(&RELAYER), 0);
    }

    #[test]
    fn test_seconds_until_epoch_end() {
        let (core, clock) = core();
        assert_eq!(core.seconds_until_epoch_end(), 100);
        clock.advance(60);
        assert_eq!(core.seconds_until_epoch_end(), 40);
        clock.advance(60);
        assert_eq!(core.seconds_until_epoch_end(), 0);
    }
}
