//! Store configuration
//!
//! Loading order is defaults, then an optional TOML file, then `TESSERA_*`
//! environment overrides, then validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tessera_core::{Result, StorageError};

/// Environment variable overriding [`StoreConfig::root`]
pub const ENV_ROOT: &str = "TESSERA_ROOT";
/// Environment variable overriding [`StoreConfig::max_bytes`]
pub const ENV_MAX_BYTES: &str = "TESSERA_MAX_BYTES";
/// Environment variable overriding [`StoreConfig::reservation_policy`]
pub const ENV_RESERVATION_POLICY: &str = "TESSERA_RESERVATION_POLICY";
/// Environment variable overriding [`StoreConfig::node_name`]
pub const ENV_NODE_NAME: &str = "TESSERA_NODE_NAME";

/// What happens to a block's reservation once the block is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationPolicy {
    /// The reservation becomes committed bytes; the block is counted once.
    #[default]
    ReleaseOnCommit,
    /// A reservation that reached a write is never returned, whether the
    /// write committed or failed. Committed blocks count against the budget
    /// twice, so admittable space only ever shrinks until restart.
    ///
    /// Reservations that never reach a write are still returned: a
    /// withdrawn declaration, one replaced by a re-declaration of the same
    /// key, and one whose `put` found the key already stored.
    Conservative,
}

impl fmt::Display for ReservationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReleaseOnCommit => f.write_str("release_on_commit"),
            Self::Conservative => f.write_str("conservative"),
        }
    }
}

impl FromStr for ReservationPolicy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "release_on_commit" => Ok(Self::ReleaseOnCommit),
            "conservative" => Ok(Self::Conservative),
            other => Err(StorageError::invalid(format!(
                "unknown reservation policy '{other}'"
            ))),
        }
    }
}

/// Configuration for a local block store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding fragments and the pin file
    pub root: PathBuf,
    /// Capacity budget in bytes
    pub max_bytes: u64,
    /// Reservation accounting on commit
    pub reservation_policy: ReservationPolicy,
    /// Name hashed to form the store's identity
    pub node_name: String,
    /// Re-hash every fragment at open and quarantine mismatches
    pub verify_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tessera-data"),
            max_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            reservation_policy: ReservationPolicy::default(),
            node_name: "tessera".to_string(),
            verify_on_open: false,
        }
    }
}

impl StoreConfig {
    /// Configuration rooted at `root` with the given budget, defaults
    /// elsewhere.
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            ..Self::default()
        }
    }

    /// Builder-style policy override
    pub fn with_reservation_policy(mut self, policy: ReservationPolicy) -> Self {
        self.reservation_policy = policy;
        self
    }

    /// Builder-style startup verification toggle
    pub fn with_verify_on_open(mut self, verify: bool) -> Self {
        self.verify_on_open = verify;
        self
    }

    /// Defaults, then `path` if given, then the environment, validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing fields take defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::io(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| StorageError::invalid(format!("Invalid TOML in {}: {e}", path.display())))
    }

    /// Apply `TESSERA_*` overrides from the process environment.
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn merge_with_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup(ENV_ROOT) {
            self.root = PathBuf::from(root);
        }
        if let Some(max_bytes) = lookup(ENV_MAX_BYTES) {
            self.max_bytes = max_bytes.trim().parse().map_err(|_| {
                StorageError::invalid(format!("Invalid byte count in {ENV_MAX_BYTES}"))
            })?;
        }
        if let Some(policy) = lookup(ENV_RESERVATION_POLICY) {
            self.reservation_policy = policy.parse()?;
        }
        if let Some(name) = lookup(ENV_NODE_NAME) {
            self.node_name = name;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(StorageError::invalid("max_bytes must be greater than 0"));
        }
        if self.node_name.is_empty() {
            return Err(StorageError::invalid("node_name cannot be empty"));
        }
        if self.root.as_os_str().is_empty() {
            return Err(StorageError::invalid("root cannot be empty"));
        }
        Ok(())
    }

    /// Directory holding block fragments
    pub fn blocks_dir(&self) -> PathBuf {
        self.root.join("blocks")
    }

    /// File holding the persisted pin set
    pub fn pins_file(&self) -> PathBuf {
        self.root.join("pins.cbor")
    }
}
