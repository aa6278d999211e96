//! Content identifiers: a multihash wrapped with a version and codec tag.

use super::multihash::Multihash;
use super::varint;
use crate::errors::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding of the bytes a CID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Codec {
    /// Opaque bytes.
    Raw,
    /// Protobuf-encoded DAG node.
    DagProtobuf,
    /// CBOR-encoded DAG node (structured blocks).
    DagCbor,
    /// Any other multicodec code.
    Other(u64),
}

impl Codec {
    /// Multicodec code.
    pub const fn code(self) -> u64 {
        match self {
            Self::Raw => 0x55,
            Self::DagProtobuf => 0x70,
            Self::DagCbor => 0x71,
            Self::Other(code) => code,
        }
    }

    /// Map a multicodec code back to a codec.
    pub const fn from_code(code: u64) -> Self {
        match code {
            0x55 => Self::Raw,
            0x70 => Self::DagProtobuf,
            0x71 => Self::DagCbor,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::DagProtobuf => f.write_str("dag-pb"),
            Self::DagCbor => f.write_str("dag-cbor"),
            Self::Other(code) => write!(f, "0x{code:x}"),
        }
    }
}

/// A versioned, codec-tagged multihash.
///
/// Only version 1 has an explicit binary form here; version 0 identifiers are
/// bare sha2-256 multihashes and are represented as [`super::BlockKey::Multihash`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cid {
    version: u64,
    codec: Codec,
    hash: Multihash,
}

impl Cid {
    /// Build a CID; version 0 is rejected because it has no wrapper bytes.
    pub fn new(version: u64, codec: Codec, hash: Multihash) -> Result<Self, StorageError> {
        if version == 0 {
            return Err(StorageError::invalid(
                "CIDv0 is a bare multihash; use BlockKey::Multihash",
            ));
        }
        Ok(Self {
            version,
            codec: Codec::from_code(codec.code()),
            hash,
        })
    }

    /// CIDv1 shorthand.
    pub fn v1(codec: Codec, hash: Multihash) -> Self {
        Self {
            version: 1,
            codec: Codec::from_code(codec.code()),
            hash,
        }
    }

    /// Rewrap another digest with this CID's version and codec.
    pub fn rewrap(&self, hash: Multihash) -> Self {
        Self {
            version: self.version,
            codec: self.codec,
            hash,
        }
    }

    /// CID version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Codec of the referenced bytes.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The wrapped multihash.
    pub fn hash(&self) -> &Multihash {
        &self.hash
    }

    /// Binary form: `varint(version) ‖ varint(codec) ‖ multihash`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.hash.digest().len() + 8);
        varint::encode(self.version, &mut out);
        varint::encode(self.codec.code(), &mut out);
        self.hash.write_bytes(&mut out);
        out
    }

    /// Parse a complete binary CID.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (version, version_len) = varint::decode(bytes)?;
        let (codec, codec_len) = varint::decode(&bytes[version_len..])?;
        let hash = Multihash::from_bytes(&bytes[version_len + codec_len..])?;
        Self::new(version, Codec::from_code(codec), hash)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cidv{}:{}:{}", self.version, self.codec, self.hash)
    }
}
