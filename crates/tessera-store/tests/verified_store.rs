//! Verified Local Store Tests
//!
//! End-to-end behaviour of a local store behind the hash-verifying
//! decorator: round-trips, tampering on disk, a dishonest inner store, pins,
//! transactions and garbage collection.

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_cbor::Value;
use std::collections::BTreeMap;
use tessera_core::cbor::link;
use tessera_core::hash::{raw_key, sha256};
use tessera_core::{
    BlockKey, CborBlock, ContentAddressedStorage, Multihash, PresignedUrl, PublicKeyHash, Result,
    StorageError, TransactionId,
};
use tessera_store::{HashVerifyingStorage, LocalStorage, StoreConfig};

fn owner(name: &str) -> PublicKeyHash {
    PublicKeyHash::new(Multihash::sha2_256(sha256(name.as_bytes())))
}

async fn verified(dir: &tempfile::TempDir) -> HashVerifyingStorage<LocalStorage> {
    let local = LocalStorage::open(StoreConfig::new(dir.path(), 1 << 20))
        .await
        .unwrap();
    HashVerifyingStorage::new(local)
}

fn node(label: &str, children: &[BlockKey]) -> Vec<u8> {
    let mut map = BTreeMap::new();
    map.insert(Value::Text("label".into()), Value::Text(label.into()));
    map.insert(
        Value::Text("children".into()),
        Value::Array(children.iter().map(link).collect()),
    );
    CborBlock::from_value(Value::Map(map)).unwrap().into_bytes()
}

#[tokio::test]
async fn raw_and_structured_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = verified(&dir).await;
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();

    let raw = store
        .put_raw(&alice, &alice, &[vec![], vec![]], &[b"one".to_vec(), b"two".to_vec()], &tid)
        .await
        .unwrap();
    assert_eq!(raw, vec![raw_key(b"one"), raw_key(b"two")]);
    assert_eq!(store.get_raw(&raw[1]).await.unwrap(), Some(b"two".to_vec()));

    let bytes = node("root", &raw);
    let structured = store
        .put(&alice, &alice, &[vec![]], &[bytes.clone()], &tid)
        .await
        .unwrap();
    let block = store.get(&structured[0]).await.unwrap().unwrap();
    assert_eq!(block.as_bytes(), bytes.as_slice());
    assert_eq!(block.links().unwrap(), raw);

    assert_eq!(store.get_raw(&raw_key(b"absent")).await.unwrap(), None);
    assert!(store.close_transaction(&alice, &tid).await.unwrap());
}

#[tokio::test]
async fn rewriting_existing_content_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = verified(&dir).await;
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();

    let first = store
        .put_raw(&alice, &alice, &[vec![]], &[b"same".to_vec()], &tid)
        .await
        .unwrap();
    let second = store
        .put_raw(&alice, &alice, &[vec![]], &[b"same".to_vec()], &tid)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(store.inner().stats().await.capacity.committed_bytes, 4);
}

#[tokio::test]
async fn tampered_fragment_fails_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = verified(&dir).await;
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();
    let keys = store
        .put_raw(&alice, &alice, &[vec![]], &[b"precious".to_vec()], &tid)
        .await
        .unwrap();

    let path = store.inner().fragment_path(&keys[0]);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let err = store.get_raw(&keys[0]).await.unwrap_err();
    assert_matches!(&err, StorageError::IntegrityViolation { expected, .. } if *expected == keys[0]);
    assert!(err.is_security_violation());
    assert!(!err.is_retryable());

    // The undecorated store hands back the corrupted bytes as-is.
    assert_eq!(store.inner().get_raw(&keys[0]).await.unwrap(), Some(bytes));
}

#[tokio::test]
async fn verify_on_open_quarantines_corrupt_fragments() {
    let dir = tempfile::tempdir().unwrap();
    let good = raw_key(b"good");
    let bad = raw_key(b"bad");
    {
        let store = verified(&dir).await;
        let alice = owner("alice");
        let tid = store.start_transaction(&alice).await.unwrap();
        store
            .put_raw(&alice, &alice, &[vec![], vec![]], &[b"good".to_vec(), b"bad".to_vec()], &tid)
            .await
            .unwrap();
        std::fs::write(store.inner().fragment_path(&bad), b"BAD").unwrap();
    }

    let config = StoreConfig::new(dir.path(), 1 << 20).with_verify_on_open(true);
    let local = LocalStorage::open(config).await.unwrap();
    assert!(local.admission().contains(&good));
    assert!(!local.admission().contains(&bad));
    assert_eq!(local.stats().await.capacity.committed_bytes, 4);
}

/// An inner store that acknowledges writes under the key of different
/// content and serves different content for every read.
struct Substituting {
    inner: LocalStorage,
}

#[async_trait]
impl ContentAddressedStorage for Substituting {
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
        self.inner.put(owner, writer, signatures, blocks, tid).await
    }
    async fn put_raw(
        &self,
        owner: &PublicKeyHash,
        writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>> {
        let mut substituted = blocks.to_vec();
        if let Some(last) = substituted.last_mut() {
            last.push(0);
        }
        self.inner
            .put_raw(owner, writer, signatures, &substituted, tid)
            .await
    }
    async fn get(&self, key: &BlockKey) -> Result<Option<CborBlock>> {
        self.inner.get(key).await
    }
    async fn get_raw(&self, key: &BlockKey) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get_raw(key).await?.map(|mut bytes| {
            bytes.reverse();
            bytes
        }))
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
    async fn recursive_unpin(&self, owner: &PublicKeyHash, key: &BlockKey) -> Result<Vec<BlockKey>> {
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

#[tokio::test]
async fn substituted_write_fails_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let inner = LocalStorage::open(StoreConfig::new(dir.path(), 1 << 20))
        .await
        .unwrap();
    let store = HashVerifyingStorage::new(Substituting { inner });
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();

    let err = store
        .put_raw(&alice, &alice, &[vec![], vec![]], &[b"honest".to_vec(), b"victim".to_vec()], &tid)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StorageError::IntegrityViolation { expected, actual }
            if expected == raw_key(b"victim\0") && actual == raw_key(b"victim")
    );
}

#[tokio::test]
async fn substituted_read_fails() {
    let dir = tempfile::tempdir().unwrap();
    let inner = LocalStorage::open(StoreConfig::new(dir.path(), 1 << 20))
        .await
        .unwrap();
    let store = HashVerifyingStorage::new(Substituting { inner });
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();

    // A palindrome survives the reversal; anything else is caught.
    let keys = store
        .inner()
        .inner
        .put_raw(&alice, &alice, &[vec![], vec![]], &[b"abba".to_vec(), b"abcd".to_vec()], &tid)
        .await
        .unwrap();
    assert_eq!(store.get_raw(&keys[0]).await.unwrap(), Some(b"abba".to_vec()));
    assert_matches!(
        store.get_raw(&keys[1]).await,
        Err(StorageError::IntegrityViolation { .. })
    );
}

#[tokio::test]
async fn gc_keeps_pinned_dags_and_open_transactions() {
    let dir = tempfile::tempdir().unwrap();
    let store = verified(&dir).await;
    let alice = owner("alice");

    let tid = store.start_transaction(&alice).await.unwrap();
    let leaves = store
        .put_raw(&alice, &alice, &[vec![], vec![]], &[b"leaf-a".to_vec(), b"leaf-b".to_vec()], &tid)
        .await
        .unwrap();
    let root = store
        .put(&alice, &alice, &[vec![]], &[node("root", &leaves)], &tid)
        .await
        .unwrap()
        .remove(0);
    let orphan = store
        .put_raw(&alice, &alice, &[vec![]], &[b"orphan".to_vec()], &tid)
        .await
        .unwrap()
        .remove(0);

    let pinned = store.recursive_pin(&alice, &root).await.unwrap();
    assert_eq!(pinned.len(), 3);
    assert_eq!(pinned[0], root);

    // Still protected by the open transaction.
    assert!(store.gc().await.unwrap());
    assert_eq!(store.get_size(&orphan).await.unwrap(), Some(6));

    assert!(store.close_transaction(&alice, &tid).await.unwrap());
    assert!(store.gc().await.unwrap());
    assert_eq!(store.get_size(&orphan).await.unwrap(), None);
    for key in leaves.iter().chain([&root]) {
        assert!(store.get_size(key).await.unwrap().is_some());
    }

    let unpinned = store.recursive_unpin(&alice, &root).await.unwrap();
    assert_eq!(unpinned.len(), 3);
    assert!(store.gc().await.unwrap());
    assert_eq!(store.get_raw(&leaves[0]).await.unwrap(), None);
    assert_eq!(store.inner().stats().await.capacity.committed_bytes, 0);
}

#[tokio::test]
async fn recursive_pin_requires_every_block() {
    let dir = tempfile::tempdir().unwrap();
    let store = verified(&dir).await;
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();

    let missing = raw_key(b"never written");
    let root = store
        .put(&alice, &alice, &[vec![]], &[node("dangling", &[missing])], &tid)
        .await
        .unwrap()
        .remove(0);

    assert_matches!(
        store.recursive_pin(&alice, &root).await,
        Err(StorageError::NotFound { .. })
    );
    assert!(store.inner().pinned(&alice).await.is_empty());
}

#[tokio::test]
async fn pin_update_moves_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = verified(&dir).await;
    let alice = owner("alice");
    let tid = store.start_transaction(&alice).await.unwrap();

    let v1 = store
        .put(&alice, &alice, &[vec![]], &[node("v1", &[])], &tid)
        .await
        .unwrap()
        .remove(0);
    let v2 = store
        .put(&alice, &alice, &[vec![]], &[node("v2", &[])], &tid)
        .await
        .unwrap()
        .remove(0);
    store.recursive_pin(&alice, &v1).await.unwrap();

    let moved = store.pin_update(&alice, &v1, &v2).await.unwrap();
    assert_eq!(moved, vec![v1.clone(), v2.clone()]);
    assert_eq!(store.inner().pinned(&alice).await, vec![v2.clone()]);

    store.close_transaction(&alice, &tid).await.unwrap();
    assert!(store.gc().await.unwrap());
    assert_eq!(store.get_size(&v1).await.unwrap(), None);
    assert!(store.get(&v2).await.unwrap().is_some());
}

#[tokio::test]
async fn leftover_partial_writes_are_discarded_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let key = raw_key(b"interrupted");
    {
        let store = verified(&dir).await;
        let partial = store.inner().fragment_path(&key).with_extension("tmp");
        std::fs::write(partial, b"interr").unwrap();
    }

    let store = verified(&dir).await;
    assert_eq!(store.get_size(&key).await.unwrap(), None);
    assert_eq!(store.inner().stats().await.capacity.blocks, 0);
    assert!(!store.inner().fragment_path(&key).with_extension("tmp").exists());
}
