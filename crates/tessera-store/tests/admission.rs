//! Admission Store Tests
//!
//! Budget and first-writer-wins behaviour under the scenarios callers rely
//! on, including contention for the last free bytes.

use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;
use tessera_core::hash::raw_key;
use tessera_core::BlockKey;
use tessera_store::{AdmissionStore, FsFragmentStore, ReservationPolicy};

async fn store(dir: &tempfile::TempDir, budget: u64) -> AdmissionStore {
    let fragments = FsFragmentStore::open(dir.path()).await.unwrap();
    AdmissionStore::new(Arc::new(fragments), budget, ReservationPolicy::ReleaseOnCommit)
}

fn key(n: usize) -> BlockKey {
    raw_key(format!("block-{n}").as_bytes())
}

#[tokio::test]
async fn duplicate_write_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, 1000).await;
    let k = key(0);
    let bytes = vec![9u8; 10];

    assert!(store.accept(&k, 10));
    assert!(store.put(&k, &bytes).await);
    assert!(!store.accept(&k, 10));
    assert!(!store.put(&k, &bytes).await);

    assert_eq!(store.stats().committed_bytes, 10);
    assert_eq!(store.read(&k).await.unwrap(), Some(bytes));
}

#[tokio::test]
async fn forced_write_after_denial_never_exceeds_budget() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, 100).await;
    let (k1, k2) = (key(1), key(2));

    assert!(store.accept(&k1, 60));
    assert!(!store.accept(&k2, 50));
    assert!(!store.put(&k2, &[0u8; 50]).await);
    assert!(store.put(&k1, &[0u8; 60]).await);

    let stats = store.stats();
    assert_eq!(stats.committed_bytes, 60);
    assert_eq!(stats.reserved_bytes, 0);
    assert!(!store.contains(&k2));
}

#[tokio::test]
async fn redeclaring_the_same_size_keeps_the_write_admitted() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, 100).await;
    let k = key(3);

    assert!(store.accept(&k, 60));
    assert!(store.accept(&k, 60));
    assert!(store.put(&k, &[0u8; 60]).await);

    let stats = store.stats();
    assert_eq!(stats.committed_bytes, 60);
    assert_eq!(stats.reserved_bytes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn contention_for_last_bytes_admits_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, 100).await;
    assert!(store.accept(&key(0), 40));

    // One 59-byte block fits beside the first 40; no two do.
    let admitted: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=16)
            .map(|n| {
                let store = &store;
                scope.spawn(move || store.accept(&key(n), 59))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum()
    });

    assert_eq!(admitted, 1);
    let stats = store.stats();
    assert_eq!(stats.reserved_bytes, 99);
    assert!(stats.committed_bytes + stats.reserved_bytes < stats.budget);
}

#[tokio::test]
async fn concurrent_writers_of_one_key_commit_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, 1000).await;
    let k = key(7);
    assert!(store.accept(&k, 32));

    let results = join_all((0..8).map(|_| store.put(&k, &[1u8; 32]))).await;
    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(store.stats().committed_bytes, 32);
    assert_eq!(store.stats().reserved_bytes, 0);
}

#[tokio::test]
async fn reopen_recomputes_committed_bytes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = store(&dir, 1000).await;
        for n in 0..3 {
            assert!(store.accept(&key(n), 100));
            assert!(store.put(&key(n), &[n as u8; 100]).await);
        }
        // Declared but never written: must not survive a restart.
        assert!(store.accept(&key(9), 100));
    }

    let fragments = FsFragmentStore::open(dir.path()).await.unwrap();
    let reopened = AdmissionStore::open(
        Arc::new(fragments),
        1000,
        ReservationPolicy::ReleaseOnCommit,
    )
    .await
    .unwrap();

    let stats = reopened.stats();
    assert_eq!(stats.blocks, 3);
    assert_eq!(stats.committed_bytes, 300);
    assert_eq!(stats.reserved_bytes, 0);
    assert!(!reopened.accept(&key(1), 100));
    assert!(reopened.accept(&key(9), 100));
}

#[derive(Debug, Clone)]
enum Op {
    Accept(usize, u64),
    Put(usize, u64),
    Withdraw(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6usize, 0..80u64).prop_map(|(k, s)| Op::Accept(k, s)),
        (0..6usize, 0..80u64).prop_map(|(k, s)| Op::Put(k, s)),
        (0..6usize).prop_map(Op::Withdraw),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_budget_never_exceeded(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = store(&dir, 200).await;

            for op in ops {
                match op {
                    Op::Accept(k, size) => {
                        store.accept(&key(k), size);
                    }
                    Op::Put(k, size) => {
                        store.put(&key(k), &vec![0u8; size as usize]).await;
                    }
                    Op::Withdraw(k) => {
                        store.withdraw(&key(k));
                    }
                }
                let stats = store.stats();
                assert!(stats.committed_bytes + stats.reserved_bytes < stats.budget);
            }

            let mut on_disk = 0;
            for k in store.keys() {
                on_disk += store.size(&k).await.unwrap().unwrap();
            }
            assert_eq!(on_disk, store.stats().committed_bytes);
        });
    }
}
