//! Block keys
//!
//! A block is addressed either by a bare multihash (which also covers CIDv0)
//! or by a CIDv1 that adds a version and codec tag around the multihash.
//! Equality is byte-exact over the binary form, so a bare multihash and a CID
//! carrying the same digest are different keys.

mod cid;
mod multihash;
mod varint;

pub use cid::{Cid, Codec};
pub use multihash::{HashType, Multihash};

use crate::errors::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Multicodec code that marks a CIDv1 binary form.
const CID_V1: u64 = 1;

/// Identifier of a stored block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockKey {
    /// Bare typed digest.
    Multihash(Multihash),
    /// Digest wrapped with version and codec.
    Cid(Cid),
}

impl BlockKey {
    /// The typed digest, unwrapping a CID if present.
    pub fn multihash(&self) -> &Multihash {
        match self {
            Self::Multihash(hash) => hash,
            Self::Cid(cid) => cid.hash(),
        }
    }

    /// Algorithm tag of the underlying digest.
    pub fn hash_type(&self) -> HashType {
        self.multihash().hash_type()
    }

    /// Codec of the referenced bytes, when the key carries one.
    pub fn codec(&self) -> Option<Codec> {
        match self {
            Self::Multihash(_) => None,
            Self::Cid(cid) => Some(cid.codec()),
        }
    }

    /// Whether the referenced bytes are a structured (dag-cbor) block.
    pub fn is_structured(&self) -> bool {
        self.codec() == Some(Codec::DagCbor)
    }

    /// Binary form of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Multihash(hash) => hash.to_bytes(),
            Self::Cid(cid) => cid.to_bytes(),
        }
    }

    /// Parse a binary key. A leading `0x01` varint marks a CIDv1; anything
    /// else is a bare multihash.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (first, _) = varint::decode(bytes)?;
        if first == CID_V1 {
            Cid::from_bytes(bytes).map(Self::Cid)
        } else {
            Multihash::from_bytes(bytes).map(Self::Multihash)
        }
    }

    /// Lowercase hex of the binary form, two digits per byte.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Inverse of [`BlockKey::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        let bytes = hex::decode(s)
            .map_err(|e| StorageError::invalid(format!("block key is not hex: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl From<Multihash> for BlockKey {
    fn from(hash: Multihash) -> Self {
        Self::Multihash(hash)
    }
}

impl From<Cid> for BlockKey {
    fn from(cid: Cid) -> Self {
        Self::Cid(cid)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multihash(hash) => fmt::Display::fmt(hash, f),
            Self::Cid(cid) => fmt::Display::fmt(cid, f),
        }
    }
}

impl FromStr for BlockKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.trim())
    }
}
