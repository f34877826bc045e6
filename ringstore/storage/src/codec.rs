//! Fixed-width payload helpers.
//!
//! Every slot stores its key and value zero-padded to the widths fixed at
//! creation. Typed values go through `postcard`, whose encoding is
//! self-delimiting, so trailing padding is ignored on the way back.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StorageError, StorageResult};

/// Copies `bytes` into a zero-filled buffer of exactly `width` bytes.
pub(crate) fn pad_to(bytes: &[u8], width: usize, what: &str) -> StorageResult<Vec<u8>> {
    if bytes.len() > width {
        return Err(StorageError::InvalidRecord(format!(
            "{what} is {} bytes, slot holds {width}",
            bytes.len()
        )));
    }
    let mut padded = vec![0u8; width];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// Pads a key, rejecting keys that could not be told apart from padding.
pub(crate) fn pad_key(key: &[u8], width: usize) -> StorageResult<Vec<u8>> {
    if key.is_empty() {
        return Err(StorageError::InvalidRecord("key must not be empty".into()));
    }
    pad_to(key, width, "key")
}

/// Serializes `value` with postcard and pads it to `width`.
pub(crate) fn encode_fixed<T: Serialize>(value: &T, width: usize) -> StorageResult<Vec<u8>> {
    let bytes =
        postcard::to_allocvec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    pad_to(&bytes, width, "encoded value")
}

/// Deserializes a postcard value from the front of a padded payload.
pub(crate) fn decode_fixed<T: DeserializeOwned>(payload: &[u8]) -> StorageResult<T> {
    let (value, _padding) = postcard::take_from_bytes(payload)
        .map_err(|e| StorageError::Deserialization(e.to_string()))?;
    Ok(value)
}
