//! Epoch lifecycle
//!
//! An epoch ends once `epoch_length` seconds have elapsed since the last
//! transition. Ending it is a resumable step function: each call seals a
//! bounded slice of the epoch's keys and the epoch only advances after the
//! last key is sealed. Callers are compensated per key they seal.

use super::error::{ProtocolError, ProtocolResult};
use super::ledger::{AttestationLedger, SealProgress};
use super::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in whole seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock (seconds since the Unix epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Outcome of one `begin_transition` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// The epoch whose keys were being sealed.
    pub epoch: u64,
    pub progress: SealProgress,
    pub epoch_advanced: bool,
    /// Compensation credited to the caller for this step.
    pub compensation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochManager {
    epoch_length: u64,
    compensation_per_key: u64,
    current_epoch: u64,
    latest_transition_time: u64,
    compensation: BTreeMap<Address, u64>,
}

impl EpochManager {
    /// Start at epoch 1 with the transition clock set to `now`.
    pub fn new(epoch_length: u64, compensation_per_key: u64, now: u64) -> Self {
        Self {
            epoch_length,
            compensation_per_key,
            current_epoch: 1,
            latest_transition_time: now,
            compensation: BTreeMap::new(),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn latest_transition_time(&self) -> u64 {
        self.latest_transition_time
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    pub fn compensation_per_key(&self) -> u64 {
        self.compensation_per_key
    }

    /// Seconds until the current epoch may end (0 once it has).
    pub fn seconds_remaining(&self, now: u64) -> u64 {
        let elapsed = now.saturating_sub(self.latest_transition_time);
        self.epoch_length.saturating_sub(elapsed)
    }

    /// Seal up to `max_keys` keys of the current epoch and advance it once
    /// every key is sealed.
    pub fn begin_transition(
        &mut self,
        ledger: &mut AttestationLedger,
        caller: Address,
        max_keys: usize,
        now: u64,
    ) -> ProtocolResult<TransitionOutcome> {
        let remaining_secs = self.seconds_remaining(now);
        if remaining_secs > 0 {
            return Err(ProtocolError::EpochNotEnded { remaining_secs });
        }

        let epoch = self.current_epoch;
        let progress = ledger.seal_pending(epoch, max_keys);

        let compensation = (progress.sealed_now as u64).saturating_mul(self.compensation_per_key);
        if compensation > 0 {
            let balance = self.compensation.entry(caller).or_default();
            *balance = balance.saturating_add(compensation);
        }

        let epoch_advanced = progress.is_complete();
        if epoch_advanced {
            self.current_epoch += 1;
            self.latest_transition_time = now;
        }

        Ok(TransitionOutcome {
            epoch,
            progress,
            epoch_advanced,
            compensation,
        })
    }

    pub fn compensation_of(&self, address: &Address) -> u64 {
        self.compensation.get(address).copied().unwrap_or(0)
    }

    /// Pay out and zero the caller's balance.
    pub fn collect_compensation(&mut self, caller: &Address) -> u64 {
        self.compensation.remove(caller).unwrap_or(0)
    }
}
