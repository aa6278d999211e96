//! # Tessera Store - Admission, Persistence and Verification
//!
//! **Purpose**: The single-node storage layer: a byte-budgeted,
//! first-writer-wins block store over durable fragments, the local
//! implementation of the storage contract on top of it, and the decorator
//! that verifies every block against its key.
//!
//! # Architecture Constraints
//!
//! **This crate depends only on tessera-core.**
//! - YES Filesystem I/O for fragments and the pin file
//! - YES Capacity admission and reservation accounting
//! - YES Hash verification of reads and writes
//! - NO network transport or replication
//! - NO signature checking (signatures are threaded through untouched)
//!
//! ```ignore
//! use tessera_store::{HashVerifyingStorage, LocalStorage, StoreConfig};
//!
//! let local = LocalStorage::open(StoreConfig::new("/var/lib/tessera", 1 << 30)).await?;
//! let store = HashVerifyingStorage::new(local);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Capacity-admission block store
pub mod admission;

/// Store configuration
pub mod config;

/// Durable block fragments
pub mod fragment;

/// Local implementation of the storage contract
pub mod local;

/// Hash-verifying decorator
pub mod verifying;

pub use admission::{AdmissionStats, AdmissionStore, PutOutcome};
pub use config::{ReservationPolicy, StoreConfig};
pub use fragment::{FragmentPersistence, FsFragmentStore};
pub use local::{LocalStorage, StoreStats};
pub use verifying::HashVerifyingStorage;
