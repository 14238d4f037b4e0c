//! epochrep - Epoch-based Zero-Knowledge Reputation
//!
//! The bookkeeping state machine behind an anonymous reputation protocol:
//! users collect attestations under per-epoch pseudonyms and later prove
//! reputation bounds without revealing who they are.
//!
//! Key principles:
//! - Single writer: every mutating call applies fully or not at all
//! - No unbounded calls: epoch transitions are resumable bounded steps
//! - Attestations are folded into hashchains, never stored
//! - Proof checking, time and signature recovery are injected
//!
//! See: `protocol::ReputationCore` for the entry point.

pub mod config;
pub mod crypto;
pub mod logging;
pub mod protocol;
pub mod serialization;
pub mod smt;

pub use config::{ProtocolConfig, Settings};
pub use crypto::Scalar;
pub use protocol::{ExternalDeps, ProtocolError, ProtocolEvent, ReputationCore};
