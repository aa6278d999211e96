// Block reads and writes

use super::{parse_key, Store};
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use tessera_core::{BlockKey, ContentAddressedStorage, PublicKeyHash};

/// Store each file as one block inside a single transaction.
pub async fn put(
    store: &Store,
    owner: &PublicKeyHash,
    files: &[PathBuf],
    raw: bool,
    pin: bool,
) -> anyhow::Result<()> {
    let mut blocks = Vec::with_capacity(files.len());
    for file in files {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        blocks.push(bytes);
    }
    // Signatures are threaded through untouched by a local store.
    let signatures = vec![Vec::new(); blocks.len()];

    let tid = store.start_transaction(owner).await?;
    let written = if raw {
        store.put_raw(owner, owner, &signatures, &blocks, &tid).await
    } else {
        store.put(owner, owner, &signatures, &blocks, &tid).await
    };

    let result = match written {
        Ok(keys) => pin_all(store, owner, &keys, pin).await.map(|()| keys),
        Err(e) => Err(e),
    };
    store.close_transaction(owner, &tid).await?;

    for (file, key) in files.iter().zip(result?) {
        println!("{}  {}  {}", key.to_hex(), key, file.display());
    }
    Ok(())
}

async fn pin_all(
    store: &Store,
    owner: &PublicKeyHash,
    keys: &[BlockKey],
    pin: bool,
) -> tessera_core::Result<()> {
    if pin {
        for key in keys {
            store.recursive_pin(owner, key).await?;
        }
    }
    Ok(())
}

/// Fetch a block and write its bytes to `output` or stdout.
pub async fn get(store: &Store, key: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let key = parse_key(key)?;
    let bytes = store
        .get_raw(&key)
        .await?
        .with_context(|| format!("block {key} not found"))?;

    match output {
        Some(path) => tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout().lock().write_all(&bytes)?,
    }
    Ok(())
}

/// Print the direct links of a structured block.
pub async fn links(store: &Store, key: &str) -> anyhow::Result<()> {
    let key = parse_key(key)?;
    for link in store.get_links(&key).await? {
        println!("{}  {}", link.to_hex(), link);
    }
    Ok(())
}
