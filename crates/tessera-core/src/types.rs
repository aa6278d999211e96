//! Owner, transaction and write-target identifiers threaded through the
//! storage contract.

use crate::keys::Multihash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hash of a user's public key; identifies owners and writers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyHash(Multihash);

impl PublicKeyHash {
    /// Wrap a multihash.
    pub fn new(hash: Multihash) -> Self {
        Self(hash)
    }

    /// The underlying multihash.
    pub fn multihash(&self) -> &Multihash {
        &self.0
    }
}

impl From<Multihash> for PublicKeyHash {
    fn from(hash: Multihash) -> Self {
        Self::new(hash)
    }
}

impl fmt::Display for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque token scoping a batch of writes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap an implementation-chosen token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random token.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pre-authorised write target handed out by `auth_writes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    /// Where the block bytes should be sent
    pub base: String,
    /// Extra request fields (headers or form fields) the target requires
    pub fields: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_transactions_are_distinct() {
        assert_ne!(TransactionId::random(), TransactionId::random());
    }

    #[test]
    fn test_owner_display_delegates() {
        let owner = PublicKeyHash::new(Multihash::identity(vec![0xaa]));
        assert_eq!(owner.to_string(), "identity:aa");
    }
}
