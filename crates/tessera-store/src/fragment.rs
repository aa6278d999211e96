//! Block fragment persistence
//!
//! One file per block in a flat directory, named by the lowercase hex of the
//! block's binary key. Writes go to `<name>.tmp`, are synced and then renamed
//! into place, so a crash leaves either a complete fragment or a temp file
//! that the next scan discards. No policy lives here.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tessera_core::{BlockKey, Result, StorageError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffix of in-progress writes
pub const TEMP_SUFFIX: &str = "tmp";
/// Suffix given to fragments that failed verification at open
pub const CORRUPT_SUFFIX: &str = "corrupt";

/// Durable storage of block bytes keyed by block key.
#[async_trait]
pub trait FragmentPersistence: Send + Sync {
    /// Durably store `data` under `key`, replacing any previous fragment.
    async fn write(&self, key: &BlockKey, data: &[u8]) -> Result<()>;

    /// Read a fragment. Absence is `Ok(None)`.
    async fn read(&self, key: &BlockKey) -> Result<Option<Vec<u8>>>;

    /// Stored length of a fragment without reading it.
    async fn size(&self, key: &BlockKey) -> Result<Option<u64>>;

    /// Delete a fragment. Returns whether one existed.
    async fn remove(&self, key: &BlockKey) -> Result<bool>;

    /// Move a fragment out of the live namespace so scans no longer see it.
    async fn quarantine(&self, key: &BlockKey) -> Result<()>;

    /// Every complete fragment with its length. Leftover partial writes are
    /// discarded.
    async fn scan(&self) -> Result<Vec<(BlockKey, u64)>>;
}

/// Name of the fragment holding `key`.
pub fn fragment_name(key: &BlockKey) -> String {
    key.to_hex()
}

/// Filesystem-backed fragment directory
#[derive(Debug, Clone)]
pub struct FsFragmentStore {
    dir: PathBuf,
}

impl FsFragmentStore {
    /// Open (creating if needed) a fragment directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::io(format!(
                "Failed to create fragment directory {}: {e}",
                dir.display()
            ))
        })?;
        info!(dir = %dir.display(), "Opened fragment directory");
        Ok(Self { dir })
    }

    /// Directory the fragments live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the fragment for `key`
    pub fn path(&self, key: &BlockKey) -> PathBuf {
        self.dir.join(fragment_name(key))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(TEMP_SUFFIX);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::io(format!("Failed to create temp file: {e}")))?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::io(format!("Failed to write data: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(format!("Failed to sync: {e}")))?;
        drop(file);
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::io(format!("Failed to rename temp file: {e}")))
    }
}

#[async_trait]
impl FragmentPersistence for FsFragmentStore {
    async fn write(&self, key: &BlockKey, data: &[u8]) -> Result<()> {
        let path = self.path(key);
        if let Err(e) = self.write_atomic(&path, data).await {
            let _ = fs::remove_file(path.with_extension(TEMP_SUFFIX)).await;
            return Err(e);
        }
        debug!(key = %key, size = data.len(), "Wrote fragment");
        Ok(())
    }

    async fn read(&self, key: &BlockKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(format!("Failed to read fragment {key}: {e}"))),
        }
    }

    async fn size(&self, key: &BlockKey) -> Result<Option<u64>> {
        match fs::metadata(self.path(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(format!("Failed to stat fragment {key}: {e}"))),
        }
    }

    async fn remove(&self, key: &BlockKey) -> Result<bool> {
        match fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(format!("Failed to remove fragment {key}: {e}"))),
        }
    }

    async fn quarantine(&self, key: &BlockKey) -> Result<()> {
        let path = self.path(key);
        let target = path.with_extension(CORRUPT_SUFFIX);
        fs::rename(&path, &target)
            .await
            .map_err(|e| StorageError::io(format!("Failed to quarantine fragment {key}: {e}")))?;
        warn!(key = %key, path = %target.display(), "Quarantined fragment");
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(BlockKey, u64)>> {
        let mut fragments = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StorageError::io(format!("Failed to read directory: {e}")))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| StorageError::io(format!("Failed to read entry: {e}")))?
        {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match path.extension().and_then(|ext| ext.to_str()) {
                Some(TEMP_SUFFIX) => {
                    debug!(path = %path.display(), "Discarding partial write");
                    fs::remove_file(&path).await?;
                }
                Some(_) => {}
                None => match BlockKey::from_hex(name) {
                    Ok(key) => fragments.push((key, metadata.len())),
                    Err(e) => warn!(name, error = %e, "Ignoring unrecognised file"),
                },
            }
        }
        Ok(fragments)
    }
}
