//! Pure synchronous hashing for content addressing
//!
//! Hashing is deterministic and side-effect free, so it is a plain trait
//! rather than an async effect. The trait exists so a verifying store can be
//! handed a different implementation (for example one backed by a hardware
//! engine) without touching call sites.
//!
//! ```ignore
//! use tessera_core::hash::{raw_key, sha256};
//!
//! let digest = sha256(b"hello world");
//! let key = raw_key(b"hello world");
//! assert_eq!(key.multihash().digest(), &digest);
//! ```

use crate::errors::StorageError;
use crate::keys::{BlockKey, Cid, Codec, HashType, Multihash};
use sha2::{Digest, Sha256};
use std::fmt;

/// Source of SHA2-256 digests.
pub trait Hasher: Send + Sync + fmt::Debug {
    /// Hash arbitrary bytes to a 32-byte digest
    fn sha256(&self, data: &[u8]) -> [u8; 32];
}

/// Software SHA2-256
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let result = Sha256::digest(data);
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }
}

/// The hasher used when none is supplied.
pub const DEFAULT_HASHER: Sha256Hasher = Sha256Hasher;

/// SHA2-256 with the default hasher
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    DEFAULT_HASHER.sha256(data)
}

/// Recompute a multihash of `data` using `hash_type`.
///
/// Only sha2-256 and identity can be computed; any other tag is reported as
/// [`StorageError::UnsupportedAlgorithm`].
pub fn compute(hasher: &dyn Hasher, hash_type: HashType, data: &[u8]) -> Result<Multihash, StorageError> {
    match hash_type {
        HashType::Sha2_256 => Ok(Multihash::sha2_256(hasher.sha256(data))),
        HashType::Identity => Ok(Multihash::identity(data)),
        other => Err(StorageError::UnsupportedAlgorithm { hash_type: other }),
    }
}

/// CIDv1 `raw` key of opaque bytes.
pub fn raw_key(data: &[u8]) -> BlockKey {
    Cid::v1(Codec::Raw, Multihash::sha2_256(sha256(data))).into()
}

/// CIDv1 `dag-cbor` key of an encoded structured block.
pub fn structured_key(data: &[u8]) -> BlockKey {
    Cid::v1(Codec::DagCbor, Multihash::sha2_256(sha256(data))).into()
}
