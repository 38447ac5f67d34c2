//! Content-addressed store of normalized baselines.
//!
//! A flat directory of files named by the SHA-256 hex digest of their
//! content, under `.cast/objects/`. Writes are atomic and idempotent, so
//! partial objects are impossible and the store is append-only from the
//! engine's perspective. Objects hold the last content two peers agreed on
//! for a given identifier; a baseline is only ever replaced by writing a new
//! object and repointing the journal.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CastError, Result};
use crate::fsutil;
use crate::normalize;

/// Handle on one vault's baseline store.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    dir: PathBuf,
}

/// Strip the `sha256:` algorithm prefix from a digest string.
fn hex_of(digest: &str) -> &str {
    digest.split_once(':').map_or(digest, |(_, hex)| hex)
}

impl ObjectStore {
    /// Open (and create if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Filesystem path of an object by digest.
    pub fn object_path(&self, digest: &str) -> PathBuf {
        self.dir.join(hex_of(digest))
    }

    /// Store content, returning its digest. Idempotent: existing objects are
    /// left untouched.
    pub fn put(&self, content: &str) -> Result<String> {
        let digest = normalize::digest_bytes(content.as_bytes());
        let path = self.object_path(&digest);
        if !path.exists() {
            fsutil::atomic_write(&path, content.as_bytes())?;
            debug!(digest = %digest, "baseline stored");
        }
        Ok(digest)
    }

    /// Read an object's content by digest, `None` if absent.
    pub fn get(&self, digest: &str) -> Result<Option<String>> {
        let path = self.object_path(digest);
        if !path.exists() {
            return Ok(None);
        }
        fsutil::read_utf8(&path).map(Some)
    }

    /// Whether an object exists.
    pub fn has(&self, digest: &str) -> bool {
        self.object_path(digest).is_file()
    }

    /// All digests currently in the store, sorted.
    pub fn list_digests(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(CastError::Io)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                digests.push(format!("sha256:{}", entry.file_name().to_string_lossy()));
            }
        }
        digests.sort();
        Ok(digests)
    }

    /// Maintenance: remove objects not referenced by any journal entry.
    ///
    /// Never invoked by the sync path; orphaned baselines are tolerable.
    pub fn remove_unreferenced(&self, referenced: &BTreeSet<String>) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for digest in self.list_digests()? {
            if !referenced.contains(&digest) {
                fs::remove_file(self.object_path(&digest))?;
                removed.push(digest);
            }
        }
        Ok(removed)
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
