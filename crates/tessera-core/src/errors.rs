//! Unified error type for block storage
//!
//! Admission, size and persistence outcomes stay local to the admission store
//! as boolean results. Everything that crosses the storage contract is a
//! `StorageError`. Integrity failures are kept distinct from routine errors so
//! that callers can treat them as a possible attack rather than bad luck.

use crate::keys::{BlockKey, HashType};
use serde::{Deserialize, Serialize};

/// Error type for all storage contract operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StorageError {
    /// Bytes did not hash to the claimed key
    #[error("Incorrect hash! Are you under attack? Expected: {expected} actual: {actual}")]
    IntegrityViolation {
        /// Key the caller asked for or the store acknowledged
        expected: BlockKey,
        /// Key recomputed from the bytes
        actual: BlockKey,
    },

    /// Identity-hashed bytes differ from the key payload
    #[error("Incorrect identity hash! This shouldn't ever happen. Key: {key}")]
    IdentityMismatch {
        /// The identity key whose payload disagreed with the bytes
        key: BlockKey,
    },

    /// The key's hash algorithm cannot be verified
    #[error("Unimplemented hash algorithm: {hash_type}")]
    UnsupportedAlgorithm {
        /// Algorithm tag found on the key
        hash_type: HashType,
    },

    /// The store's byte budget cannot take the block
    #[error("Quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded {
        /// Declared block size
        requested: u64,
        /// Bytes still admittable at the time of the check
        available: u64,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// What was missing
        message: String,
    },

    /// Invalid input
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Durable storage failed
    #[error("I/O error: {message}")]
    Io {
        /// Underlying I/O failure
        message: String,
    },

    /// Encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Transaction misuse
    #[error("Transaction error: {message}")]
    Transaction {
        /// Error message describing the transaction failure
        message: String,
    },

    /// Operation not offered by this store
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Which operation
        message: String,
    },
}

impl StorageError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Hash or identity mismatch: corruption or tampering
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation { .. } | Self::IdentityMismatch { .. }
        )
    }

    /// Whether repeating the same call could succeed.
    ///
    /// Verification failures are deterministic: the same bytes re-fail the
    /// same check.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::QuotaExceeded { .. })
    }
}

/// Standard Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

impl From<serde_cbor::Error> for StorageError {
    fn from(err: serde_cbor::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
