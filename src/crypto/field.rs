//! Scalar values and the SNARK scalar field
//!
//! Every value that crosses the proof boundary (public signals, hashchains,
//! tree nodes, attestation fields) is a 256-bit big-endian word. Callers may
//! hand in arbitrary words; the protocol decides where a word must lie inside
//! the BN254 scalar field and rejects it otherwise.
//!
//! ## Encoding
//!
//! - In memory: `[u8; 32]`, big-endian, so the derived `Ord` is numeric order
//! - On the wire (serde): `0x`-prefixed, 64 hex chars

use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// BN254 scalar field modulus `r`, big-endian.
///
/// `r = 21888242871839275222246405745257275088548364400416034343698204186575808495617`
pub const SNARK_SCALAR_FIELD: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

static MODULUS: LazyLock<BigUint> = LazyLock::new(|| BigUint::from_bytes_be(&SNARK_SCALAR_FIELD));

/// Errors from parsing scalars.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("invalid hex scalar: {0}")]
    InvalidHex(String),

    #[error("scalar needs {0} hex digits, at most 64 fit in 256 bits")]
    TooLong(usize),
}

/// A 256-bit big-endian word.
///
/// A `Scalar` is not guaranteed to be a field element; use
/// [`Scalar::is_in_field`] where the protocol requires one. Hash outputs are
/// always in the field.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Scalar([u8; 32]);

impl Scalar {
    pub const ZERO: Scalar = Scalar([0u8; 32]);
    pub const ONE: Scalar = Scalar::from_u64(1);

    /// Largest representable word (`2^256 - 1`), well outside the field.
    pub const MAX: Scalar = Scalar([0xff; 32]);

    /// The field modulus itself. The smallest word that is NOT a field element.
    pub const MODULUS: Scalar = Scalar(SNARK_SCALAR_FIELD);

    pub const fn from_u64(value: u64) -> Self {
        let be = value.to_be_bytes();
        let mut bytes = [0u8; 32];
        let mut i = 0;
        while i < 8 {
            bytes[24 + i] = be[i];
            i += 1;
        }
        Self(bytes)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Strictly less than the SNARK scalar field modulus.
    pub fn is_in_field(&self) -> bool {
        self.0 < SNARK_SCALAR_FIELD
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Reduce an arbitrary-width integer into the field.
    pub fn reduce(value: &BigUint) -> Self {
        let reduced = value % &*MODULUS;
        let bytes = reduced.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Self(out)
    }

    /// Interpret the word as a leaf index of a tree with `depth` levels.
    ///
    /// Returns `None` unless the word is strictly below `2^depth`
    /// (`depth` is capped at 128).
    pub fn to_index(&self, depth: u8) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        let value = u128::from_be_bytes(low);
        if depth >= 128 || value >> depth == 0 {
            Some(value)
        } else {
            None
        }
    }

    /// Parse a hex word, with or without `0x`, left-padded to 256 bits.
    pub fn from_hex(input: &str) -> Result<Self, FieldError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.len() > 64 {
            return Err(FieldError::TooLong(digits.len()));
        }
        let padded = format!("{:0>64}", digits);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|e| FieldError::InvalidHex(format!("{}: {}", input, e)))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::from_u64(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", self.to_hex())
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl de::Visitor<'_> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a hex-encoded 256-bit word (with or without 0x prefix)")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Scalar::from_hex(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(ScalarVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulus_is_first_out_of_field_value() {
        let below = Scalar::reduce(&(Scalar::MODULUS.to_biguint() - 1u32));
        assert!(below.is_in_field());
        assert!(!Scalar::MODULUS.is_in_field());
        assert!(!Scalar::MAX.is_in_field());
        assert!(Scalar::ZERO.is_in_field());
    }

    #[test]
    fn test_modulus_decimal_matches() {
        let expected: BigUint =
            "21888242871839275222246405745257275088548364400416034343698204186575808495617"
                .parse()
                .unwrap();
        assert_eq!(Scalar::MODULUS.to_biguint(), expected);
    }

    #[test]
    fn test_reduce_wraps_modulus_to_zero() {
        assert_eq!(Scalar::reduce(&Scalar::MODULUS.to_biguint()), Scalar::ZERO);
        let plus_seven = Scalar::MODULUS.to_biguint() + 7u32;
        assert_eq!(Scalar::reduce(&plus_seven), Scalar::from_u64(7));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(Scalar::from_u64(255) < Scalar::from_u64(256));
        assert!(Scalar::from_u128(u128::MAX) < Scalar::MODULUS);
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Scalar::from_hex("0x2a").unwrap(), Scalar::from_u64(42));
        assert_eq!(Scalar::from_hex("2a").unwrap(), Scalar::from_u64(42));
        assert_eq!(
            Scalar::from_hex(&Scalar::MODULUS.to_hex()).unwrap(),
            Scalar::MODULUS
        );
        assert!(matches!(
            Scalar::from_hex(&"1".repeat(65)),
            Err(FieldError::TooLong(65))
        ));
        assert!(matches!(
            Scalar::from_hex("0xzz"),
            Err(FieldError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_to_index_bounds() {
        assert_eq!(Scalar::from_u64(15).to_index(4), Some(15));
        assert_eq!(Scalar::from_u64(16).to_index(4), None);
        assert_eq!(Scalar::from_u128(u128::MAX).to_index(128), Some(u128::MAX));
        assert_eq!(Scalar::MODULUS.to_index(128), None);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let value = Scalar::from_u64(0xabcdef);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            "\"0x0000000000000000000000000000000000000000000000000000000000abcdef\""
        );
        let back: Scalar = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
