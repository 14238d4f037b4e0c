//! Protocol hash `H` over scalars
//!
//! One hash function serves every commitment in the protocol: attestation
//! digests, hashchain folds, the sealing marker, GST leaves and sparse Merkle
//! tree nodes. It is Poseidon over the BN254 scalar field with the iden3
//! parameters (width 3, 8 full rounds, 57 partial rounds, `x^5` S-box), so
//! roots and hashchains match what the circuits compute.
//!
//! ## Arity
//!
//! - Two inputs: exactly circomlib's `Poseidon(2)` (capacity element 0).
//! - Any other count: the same permutation absorbing at rate 2, with the
//!   input count in the capacity element, so `H(a, b)` and `H(a, b, 0)` differ.

use super::field::Scalar;
use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::{Field, PrimeField};
use poseidon_primitives::poseidon::primitives::{
    Hash as PoseidonHash, Spec, VariableLengthIden3,
};
use std::sync::LazyLock;

const POSEIDON_WIDTH: usize = 3;
const POSEIDON_RATE: usize = 2;
const POSEIDON_FULL_ROUNDS: usize = 8;
const POSEIDON_PARTIAL_ROUNDS: usize = 57;

type RoundConstants = (
    Vec<[Fr; POSEIDON_WIDTH]>,
    [[Fr; POSEIDON_WIDTH]; POSEIDON_WIDTH],
    [[Fr; POSEIDON_WIDTH]; POSEIDON_WIDTH],
);

/// Grain LFSR output for the parameters above, generated once.
static CONSTANTS: LazyLock<RoundConstants> = LazyLock::new(GrainSpec::constants);

/// Parameter set with constants derived on every call.
#[derive(Debug)]
struct GrainSpec;

impl Spec<Fr, POSEIDON_WIDTH, POSEIDON_RATE> for GrainSpec {
    fn full_rounds() -> usize {
        POSEIDON_FULL_ROUNDS
    }

    fn partial_rounds() -> usize {
        POSEIDON_PARTIAL_ROUNDS
    }

    fn sbox(val: Fr) -> Fr {
        val.pow_vartime([5])
    }

    fn secure_mds() -> usize {
        0
    }
}

/// Same parameters, constants served from [`CONSTANTS`].
#[derive(Debug)]
struct ProtocolSpec;

impl Spec<Fr, POSEIDON_WIDTH, POSEIDON_RATE> for ProtocolSpec {
    fn full_rounds() -> usize {
        POSEIDON_FULL_ROUNDS
    }

    fn partial_rounds() -> usize {
        POSEIDON_PARTIAL_ROUNDS
    }

    fn sbox(val: Fr) -> Fr {
        GrainSpec::sbox(val)
    }

    fn secure_mds() -> usize {
        0
    }

    fn constants() -> RoundConstants {
        CONSTANTS.clone()
    }
}

fn poseidon(inputs: &[Fr], capacity: u128) -> Fr {
    PoseidonHash::<Fr, ProtocolSpec, VariableLengthIden3, POSEIDON_WIDTH, POSEIDON_RATE>::init()
        .hash_with_cap(inputs, capacity)
}

/// Field element for a scalar; words outside the field are reduced first.
fn to_fr(scalar: &Scalar) -> Fr {
    let canonical = if scalar.is_in_field() {
        *scalar
    } else {
        Scalar::reduce(&scalar.to_biguint())
    };
    let mut repr = <Fr as PrimeField>::Repr::default();
    let mut little_endian = *canonical.as_bytes();
    little_endian.reverse();
    repr.as_mut().copy_from_slice(&little_endian);
    // canonical < r, so the representation is always accepted
    Option::<Fr>::from(Fr::from_repr(repr)).unwrap_or(Fr::ZERO)
}

fn from_fr(element: &Fr) -> Scalar {
    let repr = element.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes.reverse();
    Scalar::from_be_bytes(bytes)
}

/// Hash a sequence of scalars into one field element.
pub fn hash_scalars(inputs: &[Scalar]) -> Scalar {
    if let [left, right] = inputs {
        return hash_left_right(left, right);
    }
    let elements: Vec<Fr> = inputs.iter().map(to_fr).collect();
    from_fr(&poseidon(&elements, inputs.len() as u128))
}

/// Two-to-one compression used for tree nodes and hashchain folds.
pub fn hash_left_right(left: &Scalar, right: &Scalar) -> Scalar {
    from_fr(&poseidon(&[to_fr(left), to_fr(right)], 0))
}
