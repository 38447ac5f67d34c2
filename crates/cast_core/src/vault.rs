//! Vault layout: a directory root plus the `.cast/` state subtree.
//!
//! ```text
//! <vault>/
//!   .cast/
//!     config.yaml            include/exclude patterns, ephemeral keys, vault id
//!     index.json             identifier -> entry, atomic single file
//!     objects/<sha256>       write-once baselines
//!     peers/<peer-id>.json   per-peer journal
//!     .lock                  advisory exclusive lock
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::VaultConfig;
use crate::error::{CastError, Result};

/// Name of the engine's state directory inside a vault.
pub const CAST_DIR: &str = ".cast";

/// An opened vault: a root directory and its loaded configuration.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    /// The vault's configuration.
    pub config: VaultConfig,
}

impl Vault {
    /// Open an existing vault, loading and validating its configuration.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config_path = VaultConfig::path_in(&root);
        if !config_path.is_file() {
            return Err(CastError::VaultNotFound(root));
        }
        let config = VaultConfig::load(&config_path)?;
        Ok(Self { root, config })
    }

    /// Initialize a new vault: create the `.cast/` skeleton and write a
    /// default configuration. Fails if the root is already a vault.
    pub fn init(root: impl Into<PathBuf>, vault_id: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let config_path = VaultConfig::path_in(&root);
        if config_path.exists() {
            return Err(CastError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("vault already initialized at {}", root.display()),
            )));
        }

        let cast_dir = root.join(CAST_DIR);
        fs::create_dir_all(cast_dir.join("objects"))?;
        fs::create_dir_all(cast_dir.join("peers"))?;

        let config = VaultConfig::new(vault_id);
        config.save(&config_path)?;
        Ok(Self { root, config })
    }

    /// The vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// This vault's identifier.
    pub fn id(&self) -> &str {
        &self.config.vault_id
    }

    /// The `.cast/` state directory.
    pub fn cast_dir(&self) -> PathBuf {
        self.root.join(CAST_DIR)
    }

    /// Path of the persisted index document.
    pub fn index_path(&self) -> PathBuf {
        self.cast_dir().join("index.json")
    }

    /// Directory of the content-addressed baseline store.
    pub fn objects_dir(&self) -> PathBuf {
        self.cast_dir().join("objects")
    }

    /// Directory of per-peer journals.
    pub fn peers_dir(&self) -> PathBuf {
        self.cast_dir().join("peers")
    }

    /// Path of the advisory exclusive lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.cast_dir().join(".lock")
    }

    /// Resolve a relative file path against the vault root.
    pub fn file_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_layout_and_open_loads_it() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::init(dir.path(), "vault-a").unwrap();
        assert!(vault.objects_dir().is_dir());
        assert!(vault.peers_dir().is_dir());
        assert!(VaultConfig::path_in(dir.path()).is_file());

        let reopened = Vault::open(dir.path()).unwrap();
        assert_eq!(reopened.id(), "vault-a");
    }

    #[test]
    fn init_refuses_an_existing_vault() {
        let dir = TempDir::new().unwrap();
        Vault::init(dir.path(), "vault-a").unwrap();
        assert!(Vault::init(dir.path(), "vault-b").is_err());
    }

    #[test]
    fn open_requires_a_config() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Vault::open(dir.path()),
            Err(CastError::VaultNotFound(_))
        ));
    }
}
