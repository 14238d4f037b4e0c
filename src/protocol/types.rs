//! Core protocol value types

use crate::crypto::{hash_scalars, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 20-byte account address (attesters, relayers, transition callers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from bytes. Returns `None` unless exactly 20 bytes are given.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Address(bytes))
    }
}

/// Attester identifier. `0` means "unregistered"; real ids start at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct AttesterId(pub u64);

impl AttesterId {
    pub const UNREGISTERED: AttesterId = AttesterId(0);

    pub fn is_registered(&self) -> bool {
        self.0 != 0
    }

    pub fn to_scalar(self) -> Scalar {
        Scalar::from_u64(self.0)
    }
}

impl fmt::Display for AttesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pseudonymous per-epoch identifier; doubles as the epoch tree leaf index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EpochKey(pub Scalar);

impl EpochKey {
    pub fn from_u64(value: u64) -> Self {
        EpochKey(Scalar::from_u64(value))
    }

    pub fn as_scalar(&self) -> &Scalar {
        &self.0
    }
}

impl fmt::Display for EpochKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reputation delta from one attester to one epoch key.
///
/// Never stored as-is: the ledger folds its digest into the key's hashchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub attester_id: AttesterId,
    pub pos_rep: Scalar,
    pub neg_rep: Scalar,
    pub graffiti: Scalar,
}

impl Attestation {
    pub fn new(attester_id: AttesterId, pos_rep: u64, neg_rep: u64, graffiti: Scalar) -> Self {
        Self {
            attester_id,
            pos_rep: Scalar::from_u64(pos_rep),
            neg_rep: Scalar::from_u64(neg_rep),
            graffiti,
        }
    }

    /// `H(attester_id, pos_rep, neg_rep, graffiti)`
    pub fn hash(&self) -> Scalar {
        hash_scalars(&[
            self.attester_id.to_scalar(),
            self.pos_rep,
            self.neg_rep,
            self.graffiti,
        ])
    }

    /// Name of the first field that is not a valid field element, if any.
    pub fn first_out_of_field(&self) -> Option<&'static str> {
        [
            ("pos_rep", &self.pos_rep),
            ("neg_rep", &self.neg_rep),
            ("graffiti", &self.graffiti),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_in_field())
        .map(|(name, _)| name)
    }
}
