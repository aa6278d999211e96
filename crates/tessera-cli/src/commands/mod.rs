// Subcommand implementations

pub mod blocks;
pub mod pins;
pub mod status;

use anyhow::Context;
use std::path::Path;
use tessera_core::hash::sha256;
use tessera_core::{BlockKey, Multihash, PublicKeyHash};
use tessera_store::{HashVerifyingStorage, LocalStorage, StoreConfig};
use tracing::debug;

/// The store every subcommand talks to
pub type Store = HashVerifyingStorage<LocalStorage>;

/// Load configuration and open the local store behind verification.
pub async fn open_store(config_path: Option<&Path>) -> anyhow::Result<Store> {
    let config = StoreConfig::load(config_path).context("loading configuration")?;
    debug!(?config, "Loaded configuration");
    let local = LocalStorage::open(config)
        .await
        .context("opening block store")?;
    Ok(HashVerifyingStorage::new(local))
}

/// Owner identity derived from a name
pub fn owner(name: &str) -> PublicKeyHash {
    PublicKeyHash::new(Multihash::sha2_256(sha256(name.as_bytes())))
}

/// Parse a hex block key from the command line
pub fn parse_key(key: &str) -> anyhow::Result<BlockKey> {
    key.parse()
        .with_context(|| format!("'{key}' is not a block key"))
}
