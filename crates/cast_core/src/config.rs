//! Per-vault configuration (`.cast/config.yaml`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CastError, Result};
use crate::fsutil;
use crate::select::Selector;

/// Protocol version this engine implements. Forward-incompatible versions
/// cause the engine to refuse operation.
pub const SUPPORTED_VERSION: &str = "1";

/// Output line-ending policy for files the applier writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Always LF (the engine-internal canonical form).
    #[default]
    Lf,
    /// Always CR-LF.
    Crlf,
    /// Platform default.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultSection {
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct IndexSection {
    include: Vec<String>,
    exclude: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_file_size: Option<u64>,
    include_hidden: bool,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            include: vec!["**/*.md".to_string()],
            exclude: vec![
                ".git/**".to_string(),
                ".cast/**".to_string(),
                ".obsidian/**".to_string(),
            ],
            max_file_size: None,
            include_hidden: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct MergeSection {
    ephemeral_keys: Vec<String>,
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            ephemeral_keys: vec![
                "updated".to_string(),
                "last_synced".to_string(),
                "base-version".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AdvancedSection {
    line_endings: LineEnding,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SyncSection {
    mirror_deletes: bool,
}

/// On-disk document shape of `.cast/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigDoc {
    #[serde(rename = "cast-version")]
    cast_version: String,
    vault: VaultSection,
    #[serde(default)]
    index: IndexSection,
    #[serde(default)]
    merge: MergeSection,
    #[serde(default)]
    advanced: AdvancedSection,
    #[serde(default)]
    sync: SyncSection,
}

/// Vault configuration: identity, selection patterns, merge settings.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Declared protocol version.
    pub cast_version: String,
    /// Unique local identifier of this vault.
    pub vault_id: String,
    /// Include glob patterns for indexing.
    pub include: Vec<String>,
    /// Exclude glob patterns for indexing.
    pub exclude: Vec<String>,
    /// Files larger than this are skipped and reported.
    pub max_file_size: Option<u64>,
    /// Whether hidden files participate in selection.
    pub include_hidden: bool,
    /// Header keys excluded from digests and merges.
    pub ephemeral_keys: Vec<String>,
    /// Output line-ending policy.
    pub line_endings: LineEnding,
    /// Whether mirror-mode sync may plan deletions of destination-only files.
    pub mirror_deletes: bool,
}

impl VaultConfig {
    /// A default configuration for a vault with the given identifier.
    pub fn new(vault_id: impl Into<String>) -> Self {
        let doc = ConfigDoc {
            cast_version: SUPPORTED_VERSION.to_string(),
            vault: VaultSection {
                id: vault_id.into(),
            },
            index: IndexSection::default(),
            merge: MergeSection::default(),
            advanced: AdvancedSection::default(),
            sync: SyncSection::default(),
        };
        Self::from_doc(doc)
    }

    fn from_doc(doc: ConfigDoc) -> Self {
        Self {
            cast_version: doc.cast_version,
            vault_id: doc.vault.id,
            include: doc.index.include,
            exclude: doc.index.exclude,
            max_file_size: doc.index.max_file_size,
            include_hidden: doc.index.include_hidden,
            ephemeral_keys: doc.merge.ephemeral_keys,
            line_endings: doc.advanced.line_endings,
            mirror_deletes: doc.sync.mirror_deletes,
        }
    }

    fn to_doc(&self) -> ConfigDoc {
        ConfigDoc {
            cast_version: self.cast_version.clone(),
            vault: VaultSection {
                id: self.vault_id.clone(),
            },
            index: IndexSection {
                include: self.include.clone(),
                exclude: self.exclude.clone(),
                max_file_size: self.max_file_size,
                include_hidden: self.include_hidden,
            },
            merge: MergeSection {
                ephemeral_keys: self.ephemeral_keys.clone(),
            },
            advanced: AdvancedSection {
                line_endings: self.line_endings,
            },
            sync: SyncSection {
                mirror_deletes: self.mirror_deletes,
            },
        }
    }

    /// Load configuration from a file, enforcing the protocol-version gate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fsutil::read_utf8(path)?;
        let doc: ConfigDoc =
            serde_yaml::from_str(&content).map_err(|source| CastError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        if doc.cast_version != SUPPORTED_VERSION {
            return Err(CastError::UnsupportedVersion {
                found: doc.cast_version,
                supported: SUPPORTED_VERSION.to_string(),
            });
        }
        Ok(Self::from_doc(doc))
    }

    /// Save configuration atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.to_doc())?;
        fsutil::atomic_write(path, yaml.as_bytes())
    }

    /// Compile this config's selection patterns.
    pub fn selector(&self) -> Result<Selector> {
        Selector::new(&self.include, &self.exclude, self.include_hidden)
    }

    /// Path to the config document under a vault root.
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(crate::vault::CAST_DIR).join("config.yaml")
    }
}
