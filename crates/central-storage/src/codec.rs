//! Row envelope and payload codec.
//!
//! Every stored value is a bincode `Envelope { expires_at_millis, payload }`.
//! The payload is itself bincode: a `StoredAggregate` for aggregate rows,
//! queue/registry records for the other column families. The uniform outer
//! layer is what lets the purge pass treat all column families alike.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Uniform outer layer carrying the expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub expires_at_millis: i64,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at_millis <= now_millis
    }
}

/// An aggregate row together with the partition fields it was written under.
///
/// Partition fields are repeated here (not parsed back out of the key) so
/// reads can filter exactly even when identifiers contain key delimiter
/// characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAggregate<T> {
    pub agent_rollup: String,
    pub transaction_type: String,
    pub transaction_name: Option<String>,
    pub capture_time: i64,
    pub row: T,
}

/// Encode a value with bincode.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

/// Decode a bincode value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Wrap a value in an envelope expiring at the given instant.
pub fn wrap<T: Serialize>(expires_at_millis: i64, value: &T) -> Result<Vec<u8>, StorageError> {
    encode(&Envelope {
        expires_at_millis,
        payload: encode(value)?,
    })
}

/// Unwrap an envelope, returning `None` when it has expired.
pub fn unwrap_unexpired<T: DeserializeOwned>(
    bytes: &[u8],
    now_millis: i64,
) -> Result<Option<T>, StorageError> {
    let envelope: Envelope = decode(bytes)?;
    if envelope.is_expired(now_millis) {
        return Ok(None);
    }
    Ok(Some(decode(&envelope.payload)?))
}
