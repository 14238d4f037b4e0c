//! Wire formats for protocol state and events
//!
//! Snapshots of [`ProtocolState`](crate::protocol::ProtocolState) are CBOR.
//! All state collections are ordered maps and sets, so equal states encode to
//! identical bytes. Indexers receive events as JSON.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("snapshot decoding failed: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    Ok(ciborium::from_reader(bytes)?)
}

/// One JSON document (event export).
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SerializationError> {
    Ok(serde_json::to_string(value)?)
}
