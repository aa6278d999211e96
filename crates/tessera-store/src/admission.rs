//! Capacity-admission block store
//!
//! Admission happens before a block's bytes arrive: `accept` reserves budget
//! for a declared size and `put` commits bytes of exactly that size. The
//! budget check and the reservation are a single compare-and-swap on one
//! counter holding committed plus reserved bytes, so two callers contending
//! for the last free bytes cannot both be admitted.
//!
//! Keys are content hashes, so a committed key is never overwritten: the
//! first writer wins and later writers are turned away.

use crate::config::ReservationPolicy;
use crate::fragment::FragmentPersistence;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{BlockKey, Result};
use tracing::{debug, info, warn};

/// Size declared by `accept` and not yet consumed by `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    size: u64,
    /// Whether budget was reserved for this declaration
    admitted: bool,
}

/// Result of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Bytes are durable and the key is committed
    Committed,
    /// No pending declaration of this size for the key
    Undeclared,
    /// The declaration was denied budget; it has been consumed
    Denied,
    /// Another writer already holds the key
    Duplicate,
    /// The fragment write failed and was rolled back
    Failed,
}

/// Point-in-time capacity figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Sum of sizes of committed blocks
    pub committed_bytes: u64,
    /// Budget held by reservations
    pub reserved_bytes: u64,
    /// Configured capacity
    pub budget: u64,
    /// Number of committed blocks
    pub blocks: usize,
}

impl AdmissionStats {
    /// Budget not yet committed or reserved
    pub fn available(&self) -> u64 {
        self.budget
            .saturating_sub(self.committed_bytes + self.reserved_bytes)
    }
}

/// Budgeted, first-writer-wins block store over a fragment backend.
pub struct AdmissionStore {
    budget: u64,
    policy: ReservationPolicy,
    fragments: Arc<dyn FragmentPersistence>,
    existing: DashSet<BlockKey>,
    pending: DashMap<BlockKey, Pending>,
    /// Committed plus reserved bytes; the figure admission checks against
    in_use: AtomicU64,
    committed: AtomicU64,
}

impl AdmissionStore {
    /// An empty store. Use [`AdmissionStore::open`] to pick up fragments
    /// already on disk.
    pub fn new(
        fragments: Arc<dyn FragmentPersistence>,
        budget: u64,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            budget,
            policy,
            fragments,
            existing: DashSet::new(),
            pending: DashMap::new(),
            in_use: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        }
    }

    /// Rebuild the existing set and committed bytes from the fragments the
    /// backend already holds.
    pub async fn open(
        fragments: Arc<dyn FragmentPersistence>,
        budget: u64,
        policy: ReservationPolicy,
    ) -> Result<Self> {
        let store = Self::new(fragments, budget, policy);
        let mut committed = 0u64;
        for (key, size) in store.fragments.scan().await? {
            store.existing.insert(key);
            committed = committed.saturating_add(size);
        }
        store.committed.store(committed, Ordering::SeqCst);
        store.in_use.store(committed, Ordering::SeqCst);
        info!(
            blocks = store.existing.len(),
            committed_bytes = committed,
            budget,
            policy = %policy,
            "Opened admission store"
        );
        if committed >= budget {
            warn!(committed_bytes = committed, budget, "Store is already at or over budget");
        }
        Ok(store)
    }

    /// Ask to store `size` bytes under `key`.
    ///
    /// Refused without any bookkeeping if the key is already committed.
    /// Otherwise the declared size is recorded whether or not budget is
    /// available, so a later `put` of a different size is still rejected.
    ///
    /// A re-declaration replaces the previous one for the same key. The
    /// previous reservation is not counted against the new size, and the
    /// swap happens under the key's entry lock in one counter update.
    pub fn accept(&self, key: &BlockKey, size: u64) -> bool {
        if self.existing.contains(key) {
            debug!(key = %key, "Refusing admission: already stored");
            return false;
        }

        let budget = self.budget;
        let entry = self.pending.entry(key.clone());
        let previous = match &entry {
            Entry::Occupied(occupied) if occupied.get().admitted => occupied.get().size,
            _ => 0,
        };

        let mut admitted = false;
        let _ = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let base = used.saturating_sub(previous);
                match base.checked_add(size).filter(|total| *total < budget) {
                    Some(total) => {
                        admitted = true;
                        Some(total)
                    }
                    None => {
                        admitted = false;
                        // A denied re-declaration still drops the old reservation.
                        (previous > 0).then_some(base)
                    }
                }
            });

        drop(entry.insert(Pending { size, admitted }));

        if admitted {
            debug!(key = %key, size, "Admitted block");
        } else {
            warn!(key = %key, size, available = self.stats().available(), "Admission denied");
        }
        admitted
    }

    /// Commit `value` under `key`.
    ///
    /// Fails with no state change when `value` is not exactly the size last
    /// declared for `key`. A declaration that was denied budget is consumed
    /// and refused, so the budget is never exceeded. The key joins the
    /// existing set before the write so concurrent duplicates are turned
    /// away; a failed write removes it again.
    pub async fn put(&self, key: &BlockKey, value: &[u8]) -> bool {
        self.try_put(key, value).await == PutOutcome::Committed
    }

    /// [`AdmissionStore::put`], reporting why a write was not committed.
    pub async fn try_put(&self, key: &BlockKey, value: &[u8]) -> PutOutcome {
        let size = value.len() as u64;
        let Some((_, pending)) = self.pending.remove_if(key, |_, p| p.size == size) else {
            debug!(key = %key, size, "Rejecting write: size does not match declaration");
            return PutOutcome::Undeclared;
        };

        if !pending.admitted {
            warn!(key = %key, size, "Rejecting write that was denied admission");
            return PutOutcome::Denied;
        }

        if !self.existing.insert(key.clone()) {
            debug!(key = %key, "Rejecting write: already stored");
            self.release(size);
            return PutOutcome::Duplicate;
        }

        match self.fragments.write(key, value).await {
            Ok(()) => {
                self.committed.fetch_add(size, Ordering::SeqCst);
                if self.policy == ReservationPolicy::Conservative {
                    self.in_use.fetch_add(size, Ordering::SeqCst);
                }
                debug!(key = %key, size, "Committed block");
                PutOutcome::Committed
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Persistence failed, rolling back");
                self.existing.remove(key);
                if self.policy == ReservationPolicy::ReleaseOnCommit {
                    self.release(size);
                }
                PutOutcome::Failed
            }
        }
    }

    /// Drop an unconsumed declaration for `key`, returning its reservation.
    pub fn withdraw(&self, key: &BlockKey) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                if pending.admitted {
                    self.release(pending.size);
                }
                true
            }
            None => false,
        }
    }

    /// Delete a committed block and return its bytes to the budget.
    pub async fn remove(&self, key: &BlockKey) -> Result<bool> {
        if !self.existing.contains(key) {
            return Ok(false);
        }
        let size = self.fragments.size(key).await?.unwrap_or(0);
        self.fragments.remove(key).await?;
        if self.existing.remove(key).is_some() {
            let _ = self
                .committed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                    Some(c.saturating_sub(size))
                });
            self.release(size);
        }
        debug!(key = %key, size, "Removed block");
        Ok(true)
    }

    /// Whether `key` is committed
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.existing.contains(key)
    }

    /// Snapshot of committed keys
    pub fn keys(&self) -> Vec<BlockKey> {
        self.existing.iter().map(|key| key.clone()).collect()
    }

    /// Bytes of a committed block
    pub async fn read(&self, key: &BlockKey) -> Result<Option<Vec<u8>>> {
        if !self.existing.contains(key) {
            return Ok(None);
        }
        self.fragments.read(key).await
    }

    /// Size of a committed block without reading it
    pub async fn size(&self, key: &BlockKey) -> Result<Option<u64>> {
        if !self.existing.contains(key) {
            return Ok(None);
        }
        self.fragments.size(key).await
    }

    /// Sum of sizes of committed blocks
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    /// Configured capacity
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Reservation accounting in effect
    pub fn policy(&self) -> ReservationPolicy {
        self.policy
    }

    /// Current capacity figures.
    ///
    /// The two counters are read separately, so while commits are in flight
    /// `reserved_bytes` can be briefly off by the size of a block being
    /// committed. Admission itself only ever reads the combined counter.
    pub fn stats(&self) -> AdmissionStats {
        let in_use = self.in_use.load(Ordering::SeqCst);
        let committed = self.committed();
        AdmissionStats {
            committed_bytes: committed,
            reserved_bytes: in_use.saturating_sub(committed),
            budget: self.budget,
            blocks: self.existing.len(),
        }
    }

    fn release(&self, size: u64) {
        let _ = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(size))
            });
    }
}

impl std::fmt::Debug for AdmissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionStore")
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
