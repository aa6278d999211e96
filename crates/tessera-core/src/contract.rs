//! Content-addressed storage contract
//!
//! The abstraction boundary between callers and every concrete store: the
//! local on-disk store, a remote peer reached over some transport, or a
//! decorator wrapping either. A remote peer implementing this trait is
//! indistinguishable from a local store.
//!
//! Calls are independent and unordered; callers that need "write before pin"
//! must await the write first. No method retries internally.

use crate::cbor::CborBlock;
use crate::errors::Result;
use crate::keys::{BlockKey, Multihash};
use crate::types::{PresignedUrl, PublicKeyHash, TransactionId};
use async_trait::async_trait;

/// Operations every block store supports.
#[async_trait]
pub trait ContentAddressedStorage: Send + Sync {
    /// Identity of the storage endpoint.
    async fn id(&self) -> Result<Multihash>;

    /// Open a write scope for `owner`. Every returned id must be closed
    /// exactly once.
    async fn start_transaction(&self, owner: &PublicKeyHash) -> Result<TransactionId>;

    /// Close a write scope. Returns `false` for an unknown or already-closed
    /// id.
    async fn close_transaction(&self, owner: &PublicKeyHash, tid: &TransactionId) -> Result<bool>;

    /// Obtain pre-authorised write targets for a batch. Signatures and sizes
    /// are passed through to whatever authoriser the implementation uses.
    async fn auth_writes(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signed_hashes: &[Vec<u8>],
        block_sizes: &[u32],
        is_raw: bool,
        tid: &TransactionId,
    ) -> Result<Vec<PresignedUrl>>;

    /// Write a batch of structured blocks; one key per block, in order.
    async fn put(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>>;

    /// Write a batch of raw blocks; one key per block, in order.
    async fn put_raw(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>>;

    /// Fetch a structured block. Absence is `Ok(None)`.
    async fn get(&self, key: &BlockKey) -> Result<Option<CborBlock>>;

    /// Fetch raw block bytes. Absence is `Ok(None)`.
    async fn get_raw(&self, key: &BlockKey) -> Result<Option<Vec<u8>>>;

    /// Move an owner's pin from `existing` to `updated`.
    async fn pin_update(
        &self,
        owner: &PublicKeyHash,
        existing: &BlockKey,
        updated: &BlockKey,
    ) -> Result<Vec<BlockKey>>;

    /// Pin `key` and everything reachable from it through links.
    async fn recursive_pin(&self, owner: &PublicKeyHash, key: &BlockKey) -> Result<Vec<BlockKey>>;

    /// Drop the pin on `key`; reachable blocks become collectable unless
    /// pinned elsewhere.
    async fn recursive_unpin(&self, owner: &PublicKeyHash, key: &BlockKey)
        -> Result<Vec<BlockKey>>;

    /// Keys a structured block links to directly.
    async fn get_links(&self, key: &BlockKey) -> Result<Vec<BlockKey>>;

    /// Stored size of a block without fetching it.
    async fn get_size(&self, key: &BlockKey) -> Result<Option<u64>>;

    /// Reclaim unpinned, unreachable blocks.
    async fn gc(&self) -> Result<bool>;
}
