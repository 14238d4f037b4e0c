//! Field elements and hashing for the reputation protocol
//!
//! This module implements:
//! - `Scalar`: 256-bit words with BN254 scalar-field range checks
//! - `H`: Poseidon over scalars (hashchains, tree nodes, GST leaves)

pub mod field;
pub mod hasher;

pub use field::{FieldError, Scalar, SNARK_SCALAR_FIELD};
pub use hasher::{hash_left_right, hash_scalars};
