//! Typed digests: an algorithm tag plus the digest bytes.

use super::varint;
use crate::errors::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

const CID_V1_MARKER: u64 = 0x01;

/// Hash algorithm tag carried by every multihash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HashType {
    /// Content stored verbatim as its own "digest".
    Identity,
    /// SHA-1 (recognised, never computed).
    Sha1,
    /// SHA2-256, the default content addressing algorithm.
    Sha2_256,
    /// SHA2-512 (recognised, never computed).
    Sha2_512,
    /// BLAKE2b-256 (recognised, never computed).
    Blake2b256,
    /// Any other multicodec code, preserved so foreign keys round-trip.
    Other(u64),
}

impl HashType {
    /// Multicodec code of this algorithm.
    pub const fn code(self) -> u64 {
        match self {
            Self::Identity => 0x00,
            Self::Sha1 => 0x11,
            Self::Sha2_256 => 0x12,
            Self::Sha2_512 => 0x13,
            Self::Blake2b256 => 0xb220,
            Self::Other(code) => code,
        }
    }

    /// Map a multicodec code back to a tag.
    pub const fn from_code(code: u64) -> Self {
        match code {
            0x00 => Self::Identity,
            0x11 => Self::Sha1,
            0x12 => Self::Sha2_256,
            0x13 => Self::Sha2_512,
            0xb220 => Self::Blake2b256,
            other => Self::Other(other),
        }
    }

    /// Fixed digest length, if the algorithm has one.
    pub const fn digest_len(self) -> Option<usize> {
        match self {
            Self::Sha1 => Some(20),
            Self::Sha2_256 | Self::Blake2b256 => Some(32),
            Self::Sha2_512 => Some(64),
            Self::Identity | Self::Other(_) => None,
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::Sha1 => f.write_str("sha1"),
            Self::Sha2_256 => f.write_str("sha2-256"),
            Self::Sha2_512 => f.write_str("sha2-512"),
            Self::Blake2b256 => f.write_str("blake2b-256"),
            Self::Other(code) => write!(f, "0x{code:x}"),
        }
    }
}

/// A self-describing digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Multihash {
    hash_type: HashType,
    digest: Vec<u8>,
}

impl Multihash {
    /// Build a multihash, checking the digest length for fixed-size algorithms.
    ///
    /// Code `0x01` is refused: it is the CIDv1 marker, so a bare multihash
    /// carrying it would parse back as a CID.
    pub fn new(hash_type: HashType, digest: impl Into<Vec<u8>>) -> Result<Self, StorageError> {
        let digest = digest.into();
        if hash_type.code() == CID_V1_MARKER {
            return Err(StorageError::invalid(
                "hash code 0x01 is reserved for the CIDv1 marker",
            ));
        }
        // `Other(0x12)` and `Sha2_256` must compare equal after a round-trip.
        let hash_type = HashType::from_code(hash_type.code());
        if let Some(expected) = hash_type.digest_len() {
            if digest.len() != expected {
                return Err(StorageError::invalid(format!(
                    "{hash_type} digest must be {expected} bytes, got {}",
                    digest.len()
                )));
            }
        }
        Ok(Self { hash_type, digest })
    }

    /// Wrap a SHA2-256 digest.
    pub fn sha2_256(digest: [u8; 32]) -> Self {
        Self {
            hash_type: HashType::Sha2_256,
            digest: digest.to_vec(),
        }
    }

    /// An identity multihash whose payload is the content itself.
    pub fn identity(content: impl Into<Vec<u8>>) -> Self {
        Self {
            hash_type: HashType::Identity,
            digest: content.into(),
        }
    }

    /// Algorithm tag.
    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// Digest bytes (for identity hashes, the content).
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Binary form: `varint(code) ‖ varint(len) ‖ digest`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digest.len() + 4);
        self.write_bytes(&mut out);
        out
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        varint::encode(self.hash_type.code(), out);
        varint::encode(self.digest.len() as u64, out);
        out.extend_from_slice(&self.digest);
    }

    /// Parse a complete binary multihash; trailing bytes are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (hash, used) = Self::read_bytes(bytes)?;
        if used != bytes.len() {
            return Err(StorageError::invalid(format!(
                "{} trailing bytes after multihash",
                bytes.len() - used
            )));
        }
        Ok(hash)
    }

    /// Parse a multihash from the front of `bytes`, returning bytes consumed.
    pub(crate) fn read_bytes(bytes: &[u8]) -> Result<(Self, usize), StorageError> {
        let (code, code_len) = varint::decode(bytes)?;
        let (len, len_len) = varint::decode(&bytes[code_len..])?;
        let start = code_len + len_len;
        let len = usize::try_from(len)
            .map_err(|_| StorageError::invalid("multihash length overflows usize"))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| StorageError::invalid("multihash digest is truncated"))?;
        let hash = Self::new(HashType::from_code(code), &bytes[start..end])?;
        Ok((hash, end))
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash_type, hex::encode(&self.digest))
    }
}
