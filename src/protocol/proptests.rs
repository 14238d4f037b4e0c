//! Property-based tests for the reputation state machine
//!
//! Tests for:
//! - Hashchain: k attestations produce the left fold of their digests
//! - Sealing: many bounded transition steps equal one unbounded step
//! - Sign-up: counts track distinct commitments, capped at max_users
//! - Attestation caps: duplicates and capacity rejections are predictable

use super::ledger::{fold_attestation, seal_hashchain};
use super::mock::{ManualClock, MockSignatureRecovery, MockVerifier};
use super::*;
use proptest::prelude::*;
use std::collections::HashSet;

const RELAYER: Address = Address([0xfe; 20]);

fn config(max_users: u64, cap: u64) -> ProtocolConfig {
    ProtocolConfig {
        global_state_tree_depth: 8,
        user_state_tree_depth: 4,
        epoch_tree_depth: 16,
        max_users,
        num_epoch_key_nonce_per_epoch: 2,
        max_attestations_per_epoch_key: cap,
        epoch_length: 30,
        attesting_fee: 0,
        transition_compensation_per_key: 1,
    }
}

fn core(max_users: u64, cap: u64) -> (ReputationCore, ManualClock) {
    let clock = ManualClock::new(0);
    let deps = ExternalDeps {
        contract_address: Address([0xcc; 20]),
        verifier: Arc::new(MockVerifier::accepting()),
        clock: Arc::new(clock.clone()),
        signatures: Arc::new(MockSignatureRecovery::new()),
    };
    (ReputationCore::new(config(max_users, cap), deps).unwrap(), clock)
}

fn attester(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address(bytes)
}

/// Register `count` attesters; attester `n` gets id `n`.
fn register_attesters(core: &mut ReputationCore, count: u64) {
    for n in 1..=count {
        core.attester_sign_up(attester(n)).unwrap();
    }
}

proptest! {
    /// Property: hashchain equals the fold of attestation digests, and
    /// sealing appends exactly one H(1, chain) link
    #[test]
    fn hashchain_is_left_fold(reps in prop::collection::vec((0u64..1000, 0u64..1000, any::<u64>()), 1..8)) {
        let (mut core, clock) = core(10, 8);
        register_attesters(&mut core, reps.len() as u64);
        let epoch_key = EpochKey::from_u64(77);

        let mut expected = Scalar::ZERO;
        for (i, (pos, neg, graffiti)) in reps.iter().enumerate() {
            let id = i as u64 + 1;
            let att = Attestation::new(AttesterId(id), *pos, *neg, Scalar::from_u64(*graffiti));
            expected = fold_attestation(&att, &expected);
            core.submit_attestation(attester(id), att, epoch_key, 0).unwrap();
        }
        prop_assert_eq!(core.hashchain(1, &epoch_key), expected);

        clock.advance(30);
        core.begin_epoch_transition(RELAYER, 1).unwrap();
        prop_assert_eq!(core.hashchain(1, &epoch_key), seal_hashchain(&expected));
        prop_assert_eq!(core.current_epoch(), 2);
    }

    /// Property: sealing in chunks of any size reaches the same state as a
    /// single call, and the epoch only advances after the last key
    #[test]
    fn chunked_sealing_matches_single_call(num_keys in 0u64..24, chunk in 1usize..6) {
        let (mut chunked, chunked_clock) = core(10, 4);
        let (mut single, single_clock) = core(10, 4);
        for c in [&mut chunked, &mut single] {
            register_attesters(c, 1);
            for key in 0..num_keys {
                let att = Attestation::new(AttesterId(1), key, 1, Scalar::ZERO);
                c.submit_attestation(attester(1), att, EpochKey::from_u64(key * 3), 0).unwrap();
            }
        }
        chunked_clock.advance(30);
        single_clock.advance(30);

        single.begin_epoch_transition(RELAYER, usize::MAX).unwrap();

        let mut steps = 0;
        loop {
            let outcome = chunked.begin_epoch_transition(RELAYER, chunk).unwrap();
            steps += 1;
            if outcome.epoch_advanced {
                break;
            }
            prop_assert_eq!(chunked.current_epoch(), 1);
            prop_assert!(chunked.num_sealed_epoch_keys(1) < num_keys as usize);
        }

        let expected_steps = (num_keys as usize).div_ceil(chunk).max(1);
        prop_assert_eq!(steps, expected_steps);
        prop_assert_eq!(chunked.current_epoch(), single.current_epoch());
        prop_assert_eq!(chunked.epoch_tree_root(1).unwrap(), single.epoch_tree_root(1).unwrap());
        prop_assert_eq!(chunked.compensation_of(&RELAYER), single.compensation_of(&RELAYER));
        prop_assert_eq!(chunked.compensation_of(&RELAYER), num_keys);
    }

    /// Property: num_sign_ups counts distinct commitments and never exceeds
    /// max_users
    #[test]
    fn sign_ups_bounded_by_capacity(
        commitments in prop::collection::vec(0u64..20, 0..40),
        max_users in 1u64..12,
    ) {
        let (mut core, _) = core(max_users, 4);
        let mut seen = HashSet::new();

        for commitment in commitments {
            let before = core.num_sign_ups();
            let result = core.user_sign_up(Scalar::from_u64(commitment));

            if seen.contains(&commitment) {
                prop_assert!(matches!(result, Err(ProtocolError::AlreadySignedUp)));
            } else if before == max_users {
                prop_assert!(
                    matches!(result, Err(ProtocolError::CapacityExceeded { .. })),
                    "expected CapacityExceeded"
                );
            } else {
                prop_assert!(result.is_ok());
                seen.insert(commitment);
            }
            prop_assert!(core.num_sign_ups() <= max_users);
            prop_assert_eq!(core.num_sign_ups(), seen.len() as u64);
        }
    }

    /// Property: a repeat attester is a duplicate regardless of the cap, and
    /// the (cap+1)-th distinct attester is rejected for capacity
    #[test]
    fn attestation_caps(attesters in prop::collection::vec(1u64..8, 1..20), cap in 1u64..5) {
        let (mut core, _) = core(10, cap);
        register_attesters(&mut core, 7);
        let epoch_key = EpochKey::from_u64(5);
        let mut accepted = HashSet::new();

        for id in attesters {
            let att = Attestation::new(AttesterId(id), 1, 0, Scalar::ZERO);
            let result = core.submit_attestation(attester(id), att, epoch_key, 0);

            if accepted.contains(&id) {
                prop_assert!(
                    matches!(result, Err(ProtocolError::DuplicateAttestation { .. })),
                    "expected DuplicateAttestation"
                );
            } else if accepted.len() as u64 >= cap {
                prop_assert!(
                    matches!(result, Err(ProtocolError::KeyCapacityExceeded { .. })),
                    "expected KeyCapacityExceeded"
                );
            } else {
                prop_assert!(result.is_ok());
                accepted.insert(id);
            }
        }
        prop_assert!(core.num_epoch_keys(1) <= 1);
    }
}
