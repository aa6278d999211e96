//! # Tessera Core - Block Keys and the Storage Contract
//!
//! **Purpose**: Define block identifiers, content hashing, structured block
//! decoding and the asynchronous contract every block store satisfies.
//!
//! # Architecture Constraints
//!
//! **This crate is the leaf of the workspace.**
//! - YES Key types (multihash, CID) and their binary encodings
//! - YES Pure hashing
//! - YES The `ContentAddressedStorage` trait and its argument types
//! - NO filesystem or network I/O (that's tessera-store)
//! - NO admission or verification policy (that's tessera-store)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Structured (CBOR) blocks and link extraction
pub mod cbor;

/// The asynchronous storage contract
pub mod contract;

/// Unified storage error type
pub mod errors;

/// Pure content hashing
pub mod hash;

/// Multihash, CID and block key types
pub mod keys;

/// Owner, transaction and write-target identifiers
pub mod types;

pub use cbor::CborBlock;
pub use contract::ContentAddressedStorage;
pub use errors::{Result, StorageError};
pub use hash::{Hasher, Sha256Hasher};
pub use keys::{BlockKey, Cid, Codec, HashType, Multihash};
pub use types::{PresignedUrl, PublicKeyHash, TransactionId};
