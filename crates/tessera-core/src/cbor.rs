//! Structured blocks
//!
//! A structured block is CBOR. Links to other blocks are CBOR tag 42 wrapping
//! a byte string of `0x00 ‖ binary key`. The submitted bytes are kept as-is
//! because they, not a re-encoding, are what the key hashes.

use crate::errors::StorageError;
use crate::keys::BlockKey;
use serde_cbor::Value;

/// CBOR tag marking a link to another block.
pub const LINK_TAG: u64 = 42;

/// Multibase prefix byte carried inside every link (identity / raw binary).
const LINK_PREFIX: u8 = 0x00;

/// A decoded structured block together with its exact encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CborBlock {
    bytes: Vec<u8>,
    value: Value,
}

impl CborBlock {
    /// Decode a structured block, keeping the original bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, StorageError> {
        let bytes = bytes.into();
        let value: Value = serde_cbor::from_slice(&bytes)?;
        Ok(Self { bytes, value })
    }

    /// Encode a value as a structured block.
    pub fn from_value(value: Value) -> Result<Self, StorageError> {
        let bytes = serde_cbor::to_vec(&value)?;
        Ok(Self { bytes, value })
    }

    /// The exact bytes the block's key is computed over.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the block, returning its encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The decoded value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Keys of every block this block links to, in encounter order.
    pub fn links(&self) -> Result<Vec<BlockKey>, StorageError> {
        let mut out = Vec::new();
        collect_links(&self.value, &mut out)?;
        Ok(out)
    }
}

/// Build the CBOR value for a link to `key`.
pub fn link(key: &BlockKey) -> Value {
    let mut bytes = vec![LINK_PREFIX];
    bytes.extend_from_slice(&key.to_bytes());
    Value::Tag(LINK_TAG, Box::new(Value::Bytes(bytes)))
}

fn collect_links(value: &Value, out: &mut Vec<BlockKey>) -> Result<(), StorageError> {
    match value {
        Value::Tag(LINK_TAG, inner) => match inner.as_ref() {
            Value::Bytes(bytes) if bytes.first() == Some(&LINK_PREFIX) => {
                out.push(BlockKey::from_bytes(&bytes[1..])?);
                Ok(())
            }
            _ => Err(StorageError::serialization(
                "CBOR tag 42 must wrap 0x00-prefixed key bytes",
            )),
        },
        Value::Tag(_, inner) => collect_links(inner, out),
        Value::Array(items) => items.iter().try_for_each(|item| collect_links(item, out)),
        Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
            collect_links(k, out)?;
            collect_links(v, out)
        }),
        _ => Ok(()),
    }
}
