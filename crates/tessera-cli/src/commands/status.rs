// Store status display

use super::Store;
use tessera_core::{ContentAddressedStorage, PublicKeyHash};

/// Print identity, capacity and pin figures.
pub async fn show(store: &Store, owner: &PublicKeyHash) -> anyhow::Result<()> {
    let local = store.inner();
    let stats = local.stats().await;
    let capacity = stats.capacity;

    println!("Store ID:          {}", store.id().await?);
    println!("Root:              {}", local.config().root.display());
    println!("Reservation:       {}", local.config().reservation_policy);
    println!("Blocks:            {}", capacity.blocks);
    println!("Committed bytes:   {}", capacity.committed_bytes);
    println!("Reserved bytes:    {}", capacity.reserved_bytes);
    println!("Available bytes:   {}", capacity.available());
    println!("Budget:            {}", capacity.budget);
    println!("Pinned roots:      {}", stats.pinned_roots);
    println!("Pinned by {owner}: {}", local.pinned(owner).await.len());
    Ok(())
}
