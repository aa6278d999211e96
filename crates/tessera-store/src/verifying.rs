//! Hash-verifying storage decorator
//!
//! Wraps any [`ContentAddressedStorage`] and re-derives the content hash of
//! every block entering or leaving it. Writes are checked against the bytes
//! the caller submitted, not bytes read back, which catches a store that
//! mis-hashes or substitutes content before acknowledging. Reads are checked
//! against the key the caller asked for, which catches a store that returns
//! substituted content for a hash.
//!
//! Mismatches are integrity violations: logged at `error` and returned, never
//! corrected. The decorator holds no mutable state.

use async_trait::async_trait;
use std::sync::Arc;
use tessera_core::{
    BlockKey, CborBlock, ContentAddressedStorage, HashType, Hasher, Multihash, PresignedUrl,
    PublicKeyHash, Result, Sha256Hasher, StorageError, TransactionId,
};
use tracing::error;

/// A store whose every block is checked against its key.
#[derive(Debug, Clone)]
pub struct HashVerifyingStorage<S> {
    inner: S,
    hasher: Arc<dyn Hasher>,
}

impl<S: ContentAddressedStorage> HashVerifyingStorage<S> {
    /// Verify `inner` with software SHA2-256.
    pub fn new(inner: S) -> Self {
        Self::with_hasher(inner, Arc::new(Sha256Hasher))
    }

    /// Verify `inner` with a specific hasher.
    pub fn with_hasher(inner: S, hasher: Arc<dyn Hasher>) -> Self {
        Self { inner, hasher }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the decorator
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Check that `bytes` hash to `claimed`.
    ///
    /// For sha2-256 the digest is recomputed and, if `claimed` is a CID,
    /// rewrapped with the same version and codec before comparing. Identity
    /// keys must carry `bytes` verbatim. Any other algorithm is unsupported.
    pub fn verify(&self, bytes: &[u8], claimed: &BlockKey) -> Result<()> {
        match claimed.hash_type() {
            HashType::Sha2_256 => {
                let computed = Multihash::sha2_256(self.hasher.sha256(bytes));
                let actual = match claimed {
                    BlockKey::Cid(cid) => BlockKey::from(cid.rewrap(computed)),
                    BlockKey::Multihash(_) => BlockKey::from(computed),
                };
                if actual != *claimed {
                    error!(expected = %claimed, actual = %actual, "Incorrect hash! Are you under attack?");
                    return Err(StorageError::IntegrityViolation {
                        expected: claimed.clone(),
                        actual,
                    });
                }
                Ok(())
            }
            HashType::Identity => {
                if claimed.multihash().digest() != bytes {
                    error!(key = %claimed, "Incorrect identity hash");
                    return Err(StorageError::IdentityMismatch {
                        key: claimed.clone(),
                    });
                }
                Ok(())
            }
            hash_type => Err(StorageError::UnsupportedAlgorithm { hash_type }),
        }
    }

    fn verify_batch(&self, blocks: &[Vec<u8>], keys: &[BlockKey]) -> Result<()> {
        if keys.len() != blocks.len() {
            error!(
                submitted = blocks.len(),
                acknowledged = keys.len(),
                "Store acknowledged a different number of blocks"
            );
            return Err(StorageError::invalid(format!(
                "store returned {} keys for {} blocks",
                keys.len(),
                blocks.len()
            )));
        }
        blocks
            .iter()
            .zip(keys)
            .try_for_each(|(block, key)| self.verify(block, key))
    }
}

#[async_trait]
impl<S: ContentAddressedStorage> ContentAddressedStorage for HashVerifyingStorage<S> {
    async fn id(&self) -> Result<Multihash> {
        self.inner.id().await
    }

    async fn start_transaction(&self, owner: &PublicKeyHash) -> Result<TransactionId> {
        self.inner.start_transaction(owner).await
    }

    async fn close_transaction(&self, owner: &PublicKeyHash, tid: &TransactionId) -> Result<bool> {
        self.inner.close_transaction(owner, tid).await
    }

    async fn auth_writes(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signed_hashes: &[Vec<u8>],
        block_sizes: &[u32],
        is_raw: bool,
        tid: &TransactionId,
    ) -> Result<Vec<PresignedUrl>> {
        self.inner
            .auth_writes(owner, writer, signed_hashes, block_sizes, is_raw, tid)
            .await
    }

    async fn put(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>> {
        let keys = self.inner.put(owner, writer, signatures, blocks, tid).await?;
        self.verify_batch(blocks, &keys)?;
        Ok(keys)
    }

    async fn put_raw(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>> {
        let keys = self
            .inner
            .put_raw(owner, writer, signatures, blocks, tid)
            .await?;
        self.verify_batch(blocks, &keys)?;
        Ok(keys)
    }

    async fn get(&self, key: &BlockKey) -> Result<Option<CborBlock>> {
        let block = self.inner.get(key).await?;
        if let Some(block) = &block {
            self.verify(block.as_bytes(), key)?;
        }
        Ok(block)
    }

    async fn get_raw(&self, key: &BlockKey) -> Result<Option<Vec<u8>>> {
        let bytes = self.inner.get_raw(key).await?;
        if let Some(bytes) = &bytes {
            self.verify(bytes, key)?;
        }
        Ok(bytes)
    }

    async fn pin_update(
        &self,
        owner: &PublicKeyHash,
        existing: &BlockKey,
        updated: &BlockKey,
    ) -> Result<Vec<BlockKey>> {
        self.inner.pin_update(owner, existing, updated).await
    }

    async fn recursive_pin(&self, owner: &PublicKeyHash, key: &BlockKey) -> Result<Vec<BlockKey>> {
        self.inner.recursive_pin(owner, key).await
    }

    async fn recursive_unpin(
        &self,
        owner: &PublicKeyHash,
        key: &BlockKey,
    ) -> Result<Vec<BlockKey>> {
        self.inner.recursive_unpin(owner, key).await
    }

    async fn get_links(&self, key: &BlockKey) -> Result<Vec<BlockKey>> {
        self.inner.get_links(key).await
    }

    async fn get_size(&self, key: &BlockKey) -> Result<Option<u64>> {
        self.inner.get_size(key).await
    }

    async fn gc(&self) -> Result<bool> {
        self.inner.gc().await
    }
}
