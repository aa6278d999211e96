//! Local on-disk implementation of the storage contract
//!
//! Wraps an [`AdmissionStore`] with the rest of the contract: transactions,
//! per-owner pins, link enumeration and garbage collection. Admission and
//! persistence outcomes, which the admission store reports as booleans,
//! become [`StorageError`]s here.

use crate::admission::{AdmissionStats, AdmissionStore, PutOutcome};
use crate::config::StoreConfig;
use crate::fragment::{FragmentPersistence, FsFragmentStore};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::hash::{self, raw_key, structured_key, DEFAULT_HASHER};
use tessera_core::{
    BlockKey, CborBlock, Codec, ContentAddressedStorage, Multihash, PresignedUrl, PublicKeyHash,
    Result, StorageError, TransactionId,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type PinSet = BTreeMap<PublicKeyHash, BTreeSet<BlockKey>>;

/// How long a writer waits between checks on a block another writer holds
const DUPLICATE_WRITE_POLL: Duration = Duration::from_millis(1);

/// How long a writer waits on another writer of the same block in total
const DUPLICATE_WRITE_WAIT: Duration = Duration::from_secs(10);

/// On-disk form of the pin set
#[derive(Debug, Default, Serialize, Deserialize)]
struct PinFile {
    owners: Vec<OwnerPins>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OwnerPins {
    owner: PublicKeyHash,
    roots: Vec<BlockKey>,
}

impl PinFile {
    fn from_set(pins: &PinSet) -> Self {
        Self {
            owners: pins
                .iter()
                .map(|(owner, roots)| OwnerPins {
                    owner: owner.clone(),
                    roots: roots.iter().cloned().collect(),
                })
                .collect(),
        }
    }

    fn into_set(self) -> PinSet {
        self.owners
            .into_iter()
            .filter(|entry| !entry.roots.is_empty())
            .map(|entry| (entry.owner, entry.roots.into_iter().collect()))
            .collect()
    }
}

/// An open write scope
#[derive(Debug)]
struct OpenTransaction {
    owner: PublicKeyHash,
    /// Keys written under this scope; protected from gc until it closes
    written: BTreeSet<BlockKey>,
}

/// Capacity figures plus pin and transaction counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Admission-store counters
    pub capacity: AdmissionStats,
    /// Number of pinned roots across all owners
    pub pinned_roots: usize,
    /// Number of open transactions
    pub open_transactions: usize,
}

/// Block store on the local filesystem
pub struct LocalStorage {
    config: StoreConfig,
    id: Multihash,
    fragments: Arc<FsFragmentStore>,
    admission: AdmissionStore,
    transactions: DashMap<TransactionId, OpenTransaction>,
    /// Held across gc so pinning and sweeping cannot interleave
    pins: Mutex<PinSet>,
    /// Writers share it from recording a key to acknowledging it; gc takes
    /// it exclusively from marking to the end of the sweep.
    write_gate: RwLock<()>,
}

impl LocalStorage {
    /// Open the store described by `config`.
    ///
    /// Recomputes the existing set and committed bytes from fragments on
    /// disk, discards partial writes and loads the pin set. With
    /// `verify_on_open`, every fragment is re-hashed first and mismatches are
    /// quarantined.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let fragments = Arc::new(FsFragmentStore::open(config.blocks_dir()).await?);

        if config.verify_on_open {
            let quarantined = verify_fragments(fragments.as_ref()).await?;
            if quarantined > 0 {
                warn!(quarantined, "Quarantined corrupt fragments at open");
            }
        }

        let admission = AdmissionStore::open(
            fragments.clone(),
            config.max_bytes,
            config.reservation_policy,
        )
        .await?;
        let pins = load_pins(&config.pins_file()).await?;
        let id = Multihash::sha2_256(hash::sha256(config.node_name.as_bytes()));

        info!(
            root = %config.root.display(),
            id = %id,
            pinned_owners = pins.len(),
            "Opened local storage"
        );

        Ok(Self {
            config,
            id,
            fragments,
            admission,
            transactions: DashMap::new(),
            pins: Mutex::new(pins),
            write_gate: RwLock::new(()),
        })
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The admission store underneath
    pub fn admission(&self) -> &AdmissionStore {
        &self.admission
    }

    /// Path of the fragment that holds (or would hold) `key`
    pub fn fragment_path(&self, key: &BlockKey) -> PathBuf {
        self.fragments.path(key)
    }

    /// Current capacity, pin and transaction figures
    pub async fn stats(&self) -> StoreStats {
        let pinned_roots = self.pins.lock().await.values().map(BTreeSet::len).sum();
        StoreStats {
            capacity: self.admission.stats(),
            pinned_roots,
            open_transactions: self.transactions.len(),
        }
    }

    /// Roots pinned by `owner`
    pub async fn pinned(&self, owner: &PublicKeyHash) -> Vec<BlockKey> {
        self.pins
            .lock()
            .await
            .get(owner)
            .map(|roots| roots.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn put_blocks(
        &self,
        owner: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
        structured: bool,
    ) -> Result<Vec<BlockKey>> {
        if signatures.len() != blocks.len() {
            return Err(StorageError::invalid(format!(
                "{} signatures for {} blocks",
                signatures.len(),
                blocks.len()
            )));
        }

        let mut keys = Vec::with_capacity(blocks.len());
        for block in blocks {
            let key = if structured {
                // Malformed links would leave a block gc cannot mark through.
                CborBlock::from_bytes(block.as_slice())?
                    .links()
                    .map_err(|e| StorageError::serialization(format!("malformed link: {e}")))?;
                structured_key(block)
            } else {
                raw_key(block)
            };
            let _gate = self.write_gate.read().await;
            self.record_write(owner, tid, &key)?;
            self.store_block(&key, block).await?;
            keys.push(key);
        }
        debug!(tid = %tid, blocks = keys.len(), structured, "Stored batch");
        Ok(keys)
    }

    /// Note `key` against an open transaction before it is written so a
    /// concurrent gc never sees it unprotected.
    fn record_write(&self, owner: &PublicKeyHash, tid: &TransactionId, key: &BlockKey) -> Result<()> {
        let mut tx = self
            .transactions
            .get_mut(tid)
            .ok_or_else(|| StorageError::transaction(format!("unknown transaction {tid}")))?;
        if tx.owner != *owner {
            return Err(StorageError::transaction(format!(
                "transaction {tid} belongs to another owner"
            )));
        }
        tx.written.insert(key.clone());
        Ok(())
    }

    /// Make `key` durable, writing `block` unless another writer already
    /// has. Only acknowledges once the fragment is on disk.
    async fn store_block(&self, key: &BlockKey, block: &[u8]) -> Result<()> {
        let size = block.len() as u64;
        let deadline = Instant::now() + DUPLICATE_WRITE_WAIT;
        loop {
            if self.admission.contains(key) {
                if self.fragments.size(key).await?.is_some() {
                    debug!(key = %key, "Block already present");
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(StorageError::io(format!(
                        "block {key} is still being written by another writer"
                    )));
                }
                // Another writer holds the key and has not finished.
                tokio::time::sleep(DUPLICATE_WRITE_POLL).await;
                continue;
            }

            if !self.admission.accept(key, size) {
                if self.admission.contains(key) {
                    continue;
                }
                self.admission.withdraw(key);
                return Err(StorageError::QuotaExceeded {
                    requested: size,
                    available: self.admission.stats().available(),
                });
            }

            match self.admission.try_put(key, block).await {
                PutOutcome::Committed => return Ok(()),
                PutOutcome::Failed => {
                    return Err(StorageError::io(format!("failed to persist block {key}")));
                }
                // Lost the declaration or the key to a concurrent writer of
                // the same content; settle on whatever that writer did.
                PutOutcome::Duplicate | PutOutcome::Undeclared | PutOutcome::Denied => {
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Links of a block, or none if it is absent or not structured.
    async fn links_of(&self, key: &BlockKey) -> Result<Vec<BlockKey>> {
        if key.codec() != Some(Codec::DagCbor) {
            return Ok(Vec::new());
        }
        match self.admission.read(key).await? {
            Some(bytes) => CborBlock::from_bytes(bytes)?.links(),
            None => Ok(Vec::new()),
        }
    }

    /// Every key reachable from `root`, root first. With `require_present`,
    /// a missing block is an error; otherwise it is skipped.
    async fn reachable(&self, root: &BlockKey, require_present: bool) -> Result<Vec<BlockKey>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if !self.admission.contains(&key) {
                if require_present {
                    return Err(StorageError::not_found(format!("block {key}")));
                }
                continue;
            }
            queue.extend(self.links_of(&key).await?);
            order.push(key);
        }
        Ok(order)
    }

    async fn save_pins(&self, pins: &PinSet) -> Result<()> {
        let bytes = serde_cbor::to_vec(&PinFile::from_set(pins))?;
        let path = self.config.pins_file();
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentAddressedStorage for LocalStorage {
    async fn id(&self) -> Result<Multihash> {
        Ok(self.id.clone())
    }

    async fn start_transaction(&self, owner: &PublicKeyHash) -> Result<TransactionId> {
        let tid = TransactionId::random();
        self.transactions.insert(
            tid.clone(),
            OpenTransaction {
                owner: owner.clone(),
                written: BTreeSet::new(),
            },
        );
        debug!(tid = %tid, owner = %owner, "Started transaction");
        Ok(tid)
    }

    async fn close_transaction(&self, owner: &PublicKeyHash, tid: &TransactionId) -> Result<bool> {
        let closed = self
            .transactions
            .remove_if(tid, |_, tx| tx.owner == *owner)
            .is_some();
        debug!(tid = %tid, closed, "Closed transaction");
        Ok(closed)
    }

    async fn auth_writes(
        &self,
        _owner: &PublicKeyHash,
        _writer: &PublicKeyHash,
        signed_hashes: &[Vec<u8>],
        block_sizes: &[u32],
        _is_raw: bool,
        _tid: &TransactionId,
    ) -> Result<Vec<PresignedUrl>> {
        if signed_hashes.len() != block_sizes.len() {
            return Err(StorageError::invalid(format!(
                "{} signed hashes for {} block sizes",
                signed_hashes.len(),
                block_sizes.len()
            )));
        }
        Err(StorageError::unsupported(
            "auth_writes: a local store takes block bytes directly",
        ))
    }

    async fn put(
        &self,
        owner: &PublicKeyHash,
        _writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>> {
        self.put_blocks(owner, signatures, blocks, tid, true).await
    }

    async fn put_raw(
        &self,
        owner: &PublicKeyHash,
        _writer: &PublicKeyHash,
        signatures: &[Vec<u8>],
        blocks: &[Vec<u8>],
        tid: &TransactionId,
    ) -> Result<Vec<BlockKey>> {
        self.put_blocks(owner, signatures, blocks, tid, false).await
    }

    async fn get(&self, key: &BlockKey) -> Result<Option<CborBlock>> {
        match self.admission.read(key).await? {
            Some(bytes) => Ok(Some(CborBlock::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_raw(&self, key: &BlockKey) -> Result<Option<Vec<u8>>> {
        self.admission.read(key).await
    }

    async fn pin_update(
        &self,
        owner: &PublicKeyHash,
        existing: &BlockKey,
        updated: &BlockKey,
    ) -> Result<Vec<BlockKey>> {
        let mut pins = self.pins.lock().await;
        self.reachable(updated, true).await?;

        let mut next = pins.clone();
        let roots = next.entry(owner.clone()).or_default();
        roots.insert(updated.clone());
        if existing != updated {
            roots.remove(existing);
        }
        self.save_pins(&next).await?;
        *pins = next;
        info!(owner = %owner, from = %existing, to = %updated, "Updated pin");
        Ok(vec![existing.clone(), updated.clone()])
    }

    async fn recursive_pin(&self, owner: &PublicKeyHash, key: &BlockKey) -> Result<Vec<BlockKey>> {
        let mut pins = self.pins.lock().await;
        let reachable = self.reachable(key, true).await?;
        let mut next = pins.clone();
        next.entry(owner.clone()).or_default().insert(key.clone());
        self.save_pins(&next).await?;
        *pins = next;
        info!(owner = %owner, root = %key, blocks = reachable.len(), "Pinned");
        Ok(reachable)
    }

    async fn recursive_unpin(
        &self,
        owner: &PublicKeyHash,
        key: &BlockKey,
    ) -> Result<Vec<BlockKey>> {
        let mut pins = self.pins.lock().await;
        let mut next = pins.clone();
        let removed = match next.get_mut(owner) {
            Some(roots) => {
                let removed = roots.remove(key);
                if roots.is_empty() {
                    next.remove(owner);
                }
                removed
            }
            None => false,
        };
        if !removed {
            debug!(owner = %owner, root = %key, "Unpin of a root that was not pinned");
            return Ok(Vec::new());
        }
        self.save_pins(&next).await?;
        *pins = next;
        let reachable = self.reachable(key, false).await?;
        info!(owner = %owner, root = %key, blocks = reachable.len(), "Unpinned");
        Ok(reachable)
    }

    async fn get_links(&self, key: &BlockKey) -> Result<Vec<BlockKey>> {
        self.links_of(key).await
    }

    async fn get_size(&self, key: &BlockKey) -> Result<Option<u64>> {
        self.admission.size(key).await
    }

    async fn gc(&self) -> Result<bool> {
        let pins = self.pins.lock().await;
        let gate = self.write_gate.write().await;

        let mut roots: Vec<BlockKey> = pins.values().flatten().cloned().collect();
        for tx in self.transactions.iter() {
            roots.extend(tx.written.iter().cloned());
        }

        let mut live = HashSet::new();
        for root in &roots {
            if live.contains(root) {
                continue;
            }
            match self.reachable(root, false).await {
                Ok(keys) => live.extend(keys),
                Err(e) => {
                    // An unreadable root keeps everything; nothing is swept
                    // on a partial mark.
                    warn!(root = %root, error = %e, "Mark failed, aborting gc");
                    return Ok(false);
                }
            }
        }

        let mut swept = 0usize;
        let mut freed = 0u64;
        for key in self.admission.keys() {
            if live.contains(&key) {
                continue;
            }
            let size = self.admission.size(&key).await?.unwrap_or(0);
            if self.admission.remove(&key).await? {
                swept += 1;
                freed += size;
            }
        }
        drop(gate);
        drop(pins);

        info!(live = live.len(), swept, freed_bytes = freed, "Garbage collection finished");
        Ok(true)
    }
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage")
            .field("root", &self.config.root)
            .field("id", &self.id)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

async fn load_pins(path: &std::path::Path) -> Result<PinSet> {
    match fs::read(path).await {
        Ok(bytes) => {
            let file: PinFile = serde_cbor::from_slice(&bytes)?;
            Ok(file.into_set())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PinSet::new()),
        Err(e) => Err(StorageError::io(format!(
            "Failed to read pin file {}: {e}",
            path.display()
        ))),
    }
}

/// Re-hash every fragment and quarantine the ones whose bytes no longer
/// match their name. Returns how many were quarantined.
async fn verify_fragments(fragments: &dyn FragmentPersistence) -> Result<usize> {
    let mut quarantined = 0;
    for (key, _) in fragments.scan().await? {
        let Some(bytes) = fragments.read(&key).await? else {
            continue;
        };
        let computed = match hash::compute(&DEFAULT_HASHER, key.hash_type(), &bytes) {
            Ok(hash) => hash,
            Err(e) => {
                debug!(key = %key, error = %e, "Skipping fragment with unverifiable key");
                continue;
            }
        };
        if &computed != key.multihash() {
            warn!(key = %key, actual = %computed, "Fragment does not match its key");
            fragments.quarantine(&key).await?;
            quarantined += 1;
        }
    }
    Ok(quarantined)
}
