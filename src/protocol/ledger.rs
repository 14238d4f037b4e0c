//! Attestation ledger
//!
//! Attestations are never stored. Each one is checked, its digest folded into
//! the target epoch key's hashchain, and its attester remembered so the same
//! attester cannot attest twice to one key in one epoch.
//!
//! Per epoch the ledger keeps the keys in first-seen order together with a
//! sealed-prefix cursor. Sealing walks that list from the cursor, so a
//! transition can be split across any number of bounded steps.

use super::error::{ProtocolError, ProtocolResult};
use super::types::{Address, Attestation, AttesterId, EpochKey};
use crate::crypto::{hash_left_right, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Folds one attestation digest into a hashchain.
pub fn fold_attestation(attestation: &Attestation, hashchain: &Scalar) -> Scalar {
    hash_left_right(&attestation.hash(), hashchain)
}

/// Terminates a hashchain: `H(1, chain)`.
pub fn seal_hashchain(hashchain: &Scalar) -> Scalar {
    hash_left_right(&Scalar::ONE, hashchain)
}

/// Bookkeeping for one epoch key within its epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochKeyRecord {
    pub hashchain: Scalar,
    pub attestation_count: u64,
    pub sealed: bool,
    pub attesters: BTreeSet<AttesterId>,
}

/// All keys attested to during one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochLedger {
    /// First-seen order; append-only.
    keys: Vec<EpochKey>,
    /// `keys[..num_sealed]` are sealed.
    num_sealed: usize,
    records: BTreeMap<EpochKey, EpochKeyRecord>,
}

impl EpochLedger {
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn num_sealed(&self) -> usize {
        self.num_sealed
    }

    pub fn is_fully_sealed(&self) -> bool {
        self.num_sealed == self.keys.len()
    }

    pub fn keys(&self) -> &[EpochKey] {
        &self.keys
    }

    pub fn record(&self, epoch_key: &EpochKey) -> Option<&EpochKeyRecord> {
        self.records.get(epoch_key)
    }

    fn check_consistent(&self, limits: &LedgerLimits) -> Result<(), String> {
        if self.num_sealed > self.keys.len() {
            return Err(format!(
                "{} keys sealed out of {}",
                self.num_sealed,
                self.keys.len()
            ));
        }
        if self.records.len() != self.keys.len() {
            return Err(format!(
                "{} records for {} keys",
                self.records.len(),
                self.keys.len()
            ));
        }
        let distinct: BTreeSet<&EpochKey> = self.keys.iter().collect();
        if distinct.len() != self.keys.len() {
            return Err("key list has duplicates".to_string());
        }

        for (position, epoch_key) in self.keys.iter().enumerate() {
            let Some(record) = self.records.get(epoch_key) else {
                return Err(format!("key {epoch_key} has no record"));
            };
            if record.sealed != (position < self.num_sealed) {
                return Err(format!(
                    "key {epoch_key} at position {position} breaks the sealed prefix"
                ));
            }
            if record.attestation_count == 0
                || record.attestation_count > limits.max_attestations_per_epoch_key
            {
                return Err(format!(
                    "key {epoch_key} has {} attestations",
                    record.attestation_count
                ));
            }
            if record.attesters.len() as u64 != record.attestation_count {
                return Err(format!(
                    "key {epoch_key} counts {} attestations from {} attesters",
                    record.attestation_count,
                    record.attesters.len()
                ));
            }
            if epoch_key.0.to_index(limits.epoch_tree_depth).is_none() {
                return Err(format!("key {epoch_key} outside the epoch tree"));
            }
        }
        Ok(())
    }
}

/// Result of one bounded sealing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealProgress {
    pub sealed_now: usize,
    pub num_sealed: usize,
    pub total: usize,
}

impl SealProgress {
    pub fn is_complete(&self) -> bool {
        self.num_sealed == self.total
    }
}

/// Limits the ledger enforces on every submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLimits {
    pub max_attestations_per_epoch_key: u64,
    pub attesting_fee: u64,
    pub epoch_tree_depth: u8,
}

/// A submission, as seen by the ledger.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub epoch: u64,
    pub caller: Address,
    /// Id registered for `caller`, `UNREGISTERED` if none.
    pub caller_id: AttesterId,
    pub attestation: &'a Attestation,
    pub epoch_key: EpochKey,
    pub fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationLedger {
    limits: LedgerLimits,
    epochs: BTreeMap<u64, EpochLedger>,
    collected_fees: u128,
}

impl AttestationLedger {
    pub fn new(limits: LedgerLimits) -> Self {
        Self {
            limits,
            epochs: BTreeMap::new(),
            collected_fees: 0,
        }
    }

    pub fn limits(&self) -> &LedgerLimits {
        &self.limits
    }

    /// Validate and record one attestation. Returns the key's new hashchain.
    ///
    /// All checks run before the ledger is touched, so a rejected submission
    /// leaves no trace.
    pub fn submit(&mut self, submission: Submission<'_>) -> ProtocolResult<Scalar> {
        let Submission {
            epoch,
            caller,
            caller_id,
            attestation,
            epoch_key,
            fee,
        } = submission;

        if !caller_id.is_registered() {
            return Err(ProtocolError::NotAnAttester { address: caller });
        }
        if attestation.attester_id != caller_id {
            return Err(ProtocolError::AttesterIdMismatch {
                caller: caller_id,
                claimed: attestation.attester_id,
            });
        }

        let existing = self.record(epoch, &epoch_key);
        if let Some(record) = existing {
            if record.sealed {
                return Err(ProtocolError::KeySealed { epoch, epoch_key });
            }
            if record.attesters.contains(&caller_id) {
                return Err(ProtocolError::DuplicateAttestation {
                    attester_id: caller_id,
                    epoch_key,
                });
            }
        }
        let count = existing.map_or(0, |record| record.attestation_count);
        if count >= self.limits.max_attestations_per_epoch_key {
            return Err(ProtocolError::KeyCapacityExceeded {
                epoch_key,
                cap: self.limits.max_attestations_per_epoch_key,
            });
        }
        if fee != self.limits.attesting_fee {
            return Err(ProtocolError::IncorrectFee {
                expected: self.limits.attesting_fee,
                got: fee,
            });
        }
        if let Some(field) = attestation.first_out_of_field() {
            return Err(ProtocolError::ValueOutOfField { field });
        }
        if epoch_key.0.to_index(self.limits.epoch_tree_depth).is_none() {
            return Err(ProtocolError::EpochKeyOutOfRange {
                epoch_key,
                depth: self.limits.epoch_tree_depth,
            });
        }

        let ledger = self.epochs.entry(epoch).or_default();
        if !ledger.records.contains_key(&epoch_key) {
            ledger.keys.push(epoch_key);
        }
        let record = ledger.records.entry(epoch_key).or_default();
        record.hashchain = fold_attestation(attestation, &record.hashchain);
        record.attestation_count += 1;
        record.attesters.insert(caller_id);
        self.collected_fees += u128::from(fee);

        Ok(record.hashchain)
    }

    /// Seal up to `max_keys` unsealed keys of `epoch`, in list order.
    ///
    /// Only keys past the sealed-prefix cursor are ever visited, so a key is
    /// sealed at most once: calling again after the epoch is complete seals
    /// nothing (`sealed_now == 0`) and leaves every hashchain untouched, and
    /// attestations to a sealed key fail with `KeySealed`.
    pub fn seal_pending(&mut self, epoch: u64, max_keys: usize) -> SealProgress {
        let Some(ledger) = self.epochs.get_mut(&epoch) else {
            return SealProgress {
                sealed_now: 0,
                num_sealed: 0,
                total: 0,
            };
        };

        let total = ledger.keys.len();
        let start = ledger.num_sealed.min(total);
        let end = total.min(start.saturating_add(max_keys));
        for epoch_key in ledger.keys.get(start..end).unwrap_or(&[]) {
            if let Some(record) = ledger.records.get_mut(epoch_key) {
                record.hashchain = seal_hashchain(&record.hashchain);
                record.sealed = true;
            }
        }
        ledger.num_sealed = end;

        SealProgress {
            sealed_now: end - start,
            num_sealed: end,
            total,
        }
    }

    /// Check the structure of a ledger decoded from a snapshot.
    ///
    /// Only `current_epoch` may be partially sealed; earlier epochs are
    /// complete and later ones cannot exist yet.
    pub fn check_consistent(&self, current_epoch: u64) -> Result<(), String> {
        for (epoch, ledger) in &self.epochs {
            if *epoch == 0 || *epoch > current_epoch {
                return Err(format!(
                    "ledger has epoch {epoch}, current epoch is {current_epoch}"
                ));
            }
            ledger
                .check_consistent(&self.limits)
                .map_err(|e| format!("epoch {epoch}: {e}"))?;
            if *epoch < current_epoch && !ledger.is_fully_sealed() {
                return Err(format!("past epoch {epoch} is not fully sealed"));
            }
        }
        Ok(())
    }

    pub fn epoch(&self, epoch: u64) -> Option<&EpochLedger> {
        self.epochs.get(&epoch)
    }

    pub fn record(&self, epoch: u64, epoch_key: &EpochKey) -> Option<&EpochKeyRecord> {
        self.epochs.get(&epoch)?.record(epoch_key)
    }

    pub fn num_epoch_keys(&self, epoch: u64) -> usize {
        self.epochs.get(&epoch).map_or(0, EpochLedger::num_keys)
    }

    pub fn num_sealed_epoch_keys(&self, epoch: u64) -> usize {
        self.epochs.get(&epoch).map_or(0, EpochLedger::num_sealed)
    }

    pub fn is_fully_sealed(&self, epoch: u64) -> bool {
        self.epochs
            .get(&epoch)
            .map_or(true, EpochLedger::is_fully_sealed)
    }

    pub fn epoch_key_at(&self, epoch: u64, index: usize) -> Option<EpochKey> {
        self.epochs.get(&epoch)?.keys.get(index).copied()
    }

    /// Current hashchain; zero for keys never attested to.
    pub fn hashchain(&self, epoch: u64, epoch_key: &EpochKey) -> Scalar {
        self.record(epoch, epoch_key)
            .map_or(Scalar::ZERO, |record| record.hashchain)
    }

    pub fn is_sealed(&self, epoch: u64, epoch_key: &EpochKey) -> bool {
        self.record(epoch, epoch_key)
            .is_some_and(|record| record.sealed)
    }

    /// `(epoch key, hashchain)` pairs of `epoch` in first-seen order.
    pub fn epoch_tree_leaves(&self, epoch: u64) -> Vec<(EpochKey, Scalar)> {
        let Some(ledger) = self.epochs.get(&epoch) else {
            return Vec::new();
        };
        ledger
            .keys
            .iter()
            .filter_map(|key| ledger.records.get(key).map(|r| (*key, r.hashchain)))
            .collect()
    }

    pub fn collected_fees(&self) -> u128 {
        self.collected_fees
    }
}
