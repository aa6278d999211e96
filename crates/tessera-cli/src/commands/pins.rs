// Pinning and garbage collection

use super::{parse_key, Store};
use tessera_core::{ContentAddressedStorage, PublicKeyHash};

/// Pin a block and report how many blocks it keeps alive.
pub async fn pin(store: &Store, owner: &PublicKeyHash, key: &str) -> anyhow::Result<()> {
    let key = parse_key(key)?;
    let reachable = store.recursive_pin(owner, &key).await?;
    println!("pinned {key} ({} blocks)", reachable.len());
    Ok(())
}

/// Drop a pin.
pub async fn unpin(store: &Store, owner: &PublicKeyHash, key: &str) -> anyhow::Result<()> {
    let key = parse_key(key)?;
    let released = store.recursive_unpin(owner, &key).await?;
    if released.is_empty() {
        println!("{key} was not pinned");
    } else {
        println!("unpinned {key} ({} blocks now collectable)", released.len());
    }
    Ok(())
}

/// Run garbage collection and report what it freed.
pub async fn gc(store: &Store) -> anyhow::Result<()> {
    let before = store.inner().stats().await.capacity;
    if !store.gc().await? {
        anyhow::bail!("garbage collection did not complete");
    }
    let after = store.inner().stats().await.capacity;
    println!(
        "removed {} blocks, freed {} bytes",
        before.blocks.saturating_sub(after.blocks),
        before.committed_bytes.saturating_sub(after.committed_bytes)
    );
    Ok(())
}
