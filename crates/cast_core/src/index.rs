//! The vault index: identifier -> entry for every tracked file.
//!
//! The index is rebuilt incrementally using (path, size, mtime) as a cache
//! key and persisted as a single JSON document written atomically. Digest
//! computation for files that need re-normalization runs on a bounded worker
//! pool; everything else is straight-line.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CastError, Result};
use crate::frontmatter::{self, RESERVED_PREFIX, TYPE_KEY, VAULTS_KEY, VERSION_KEY};
use crate::fsutil;
use crate::identity;
use crate::normalize::{self, Normalized};
use crate::vault::Vault;

/// Upper bound on digest workers; small vaults stay effectively serial.
const MAX_DIGEST_WORKERS: usize = 8;

/// Index document format version.
pub const INDEX_VERSION: u32 = 1;

/// One tracked file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    /// Path relative to the vault root, forward-slash form.
    pub path: String,
    /// Title derived from the file stem.
    pub title: String,
    /// File size in bytes at index time.
    pub size: u64,
    /// Modification time in milliseconds since the epoch.
    pub mtime_ms: i64,
    /// Digest over the normalized full content (`sha256:<hex>`).
    pub digest: String,
    /// Digest over the normalized body alone. Sync decisions use this.
    pub body_digest: String,
    /// Document type (`cast-type`), if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_type: Option<String>,
    /// Raw participation entries (`cast-vaults`).
    #[serde(default)]
    pub cast_vaults: Vec<String>,
    /// Declared protocol version (`cast-version`), defaulting to "1".
    pub cast_version: String,
}

/// The persisted index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Document format version.
    pub version: u32,
    /// Identifier -> entry, sorted for stable serialization.
    pub files: BTreeMap<String, IndexEntry>,
}

impl IndexSnapshot {
    /// An empty snapshot at the current format version.
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            files: BTreeMap::new(),
        }
    }

    /// Look up an entry by identifier.
    pub fn lookup_by_id(&self, id: &str) -> Option<&IndexEntry> {
        self.files.get(id)
    }

    /// Find an entry (and its identifier) by relative path.
    pub fn find_by_path(&self, rel: &str) -> Option<(&String, &IndexEntry)> {
        self.files.iter().find(|(_, entry)| entry.path == rel)
    }

    /// Insert or replace an entry.
    pub fn upsert(&mut self, id: String, entry: IndexEntry) {
        self.files.insert(id, entry);
    }

    /// Load the snapshot persisted for a vault, empty if none exists yet.
    pub fn load(vault: &Vault) -> Result<Self> {
        let path = vault.index_path();
        if !path.is_file() {
            return Ok(Self::new());
        }
        let content = fsutil::read_utf8(&path)?;
        serde_json::from_str(&content).map_err(|e| CastError::IndexCorrupted {
            path,
            detail: e.to_string(),
        })
    }

    /// Persist the snapshot atomically.
    pub fn save(&self, vault: &Vault) -> Result<()> {
        fsutil::atomic_write_json(&vault.index_path(), self)
    }
}

/// Build mode for [`build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Reuse digests for files whose (path, size, mtime) are unchanged.
    Incremental,
    /// Recompute everything from disk.
    Rebuild,
}

/// A file the build could not index, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    /// Path relative to the vault root.
    pub path: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Result of an index build: the new snapshot plus per-file skips.
#[derive(Debug)]
pub struct IndexBuild {
    /// The rebuilt snapshot (already persisted).
    pub snapshot: IndexSnapshot,
    /// Files that were selected but could not be indexed.
    pub skipped: Vec<SkippedFile>,
}

struct PendingFile {
    rel: String,
    size: u64,
    mtime_ms: i64,
    content: String,
}

/// Build or update the vault index.
///
/// With `auto_fix`, header-bearing files that carry cast metadata but no
/// identifier get one injected (atomic write-back), and files whose
/// identifier is not the first header key are reordered, before digesting.
///
/// Invariants on success: every entry's path exists and was readable, no two
/// entries share an identifier, and digests correspond to the on-disk
/// normalized content at build time.
pub fn build(vault: &Vault, mode: BuildMode, auto_fix: bool) -> Result<IndexBuild> {
    let selector = vault.config.selector()?;
    let selected = selector.select(vault.root())?;

    let prior = match mode {
        BuildMode::Incremental => IndexSnapshot::load(vault)?,
        BuildMode::Rebuild => IndexSnapshot::new(),
    };
    let prior_by_path: HashMap<&str, (&String, &IndexEntry)> = prior
        .files
        .iter()
        .map(|(id, entry)| (entry.path.as_str(), (id, entry)))
        .collect();

    let mut snapshot = IndexSnapshot::new();
    let mut skipped = Vec::new();
    let mut pending = Vec::new();

    for rel in selected {
        let abs = vault.file_path(&rel);
        let meta = fs::metadata(&abs).map_err(|e| CastError::FileRead {
            path: abs.clone(),
            source: e,
        })?;
        let size = meta.len();
        let mtime_ms = mtime_millis(&meta);

        if let Some(limit) = vault.config.max_file_size {
            if size > limit {
                skipped.push(SkippedFile {
                    path: rel,
                    reason: format!("file size {size} exceeds limit {limit}"),
                });
                continue;
            }
        }

        if let Some((id, entry)) = prior_by_path.get(rel.as_str()) {
            if entry.size == size && entry.mtime_ms == mtime_ms {
                insert_checked(&mut snapshot, (*id).clone(), (*entry).clone())?;
                continue;
            }
        }

        match fsutil::read_utf8(&abs) {
            Ok(content) => pending.push(PendingFile {
                rel,
                size,
                mtime_ms,
                content,
            }),
            Err(CastError::Encoding(_)) => {
                skipped.push(SkippedFile {
                    path: rel,
                    reason: "content is not valid UTF-8".to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    if auto_fix {
        fix_pending(vault, &mut pending, &mut skipped)?;
    }

    let ephemeral = vault.config.ephemeral_keys.clone();
    for (file, normalized) in digest_parallel(&pending, &ephemeral) {
        let normalized = match normalized {
            Ok(n) => n,
            Err(CastError::MalformedHeader(_)) => {
                skipped.push(SkippedFile {
                    path: file.rel.clone(),
                    reason: "malformed header block".to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        let Some(header) = &normalized.header else {
            continue; // headerless files are un-indexed
        };
        let Some(id) = identity::extract_id(header) else {
            if header.keys().any(|k| k.starts_with(RESERVED_PREFIX)) {
                warn!(path = %file.rel, "file has cast metadata but no cast-id; run an index build with auto-fix");
                skipped.push(SkippedFile {
                    path: file.rel.clone(),
                    reason: "cast metadata present but no identifier".to_string(),
                });
            }
            continue;
        };

        let entry = entry_from(file, &normalized, header);
        insert_checked(&mut snapshot, id, entry)?;
    }

    snapshot.save(vault)?;
    info!(
        vault = vault.id(),
        entries = snapshot.files.len(),
        skipped = skipped.len(),
        "index built"
    );
    Ok(IndexBuild { snapshot, skipped })
}

/// Re-index a single file after the applier wrote it, updating `snapshot`.
pub fn index_single(
    vault: &Vault,
    snapshot: &mut IndexSnapshot,
    rel: &str,
) -> Result<Option<String>> {
    let abs = vault.file_path(rel);
    let meta = fs::metadata(&abs).map_err(|e| CastError::FileRead {
        path: abs.clone(),
        source: e,
    })?;
    let content = fsutil::read_utf8(&abs)?;
    let normalized = normalize::normalize(&content, &vault.config.ephemeral_keys)?;

    let Some(header) = &normalized.header else {
        return Ok(None);
    };
    let Some(id) = identity::extract_id(header) else {
        return Ok(None);
    };

    let file = PendingFile {
        rel: rel.to_string(),
        size: meta.len(),
        mtime_ms: mtime_millis(&meta),
        content,
    };
    let entry = entry_from(&file, &normalized, header);
    snapshot.upsert(id.clone(), entry);
    Ok(Some(id))
}

/// An inconsistency found by [`verify`].
#[derive(Debug, Clone, Serialize)]
pub struct IndexIssue {
    /// Issue kind: `missing_file`, `id_mismatch`, `digest_mismatch`,
    /// or `duplicate_id`.
    pub kind: String,
    /// The identifier involved.
    pub cast_id: String,
    /// The path involved, relative to the vault root.
    pub path: String,
    /// Extra detail where useful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Check a persisted snapshot against the filesystem.
pub fn verify(vault: &Vault, snapshot: &IndexSnapshot) -> Result<Vec<IndexIssue>> {
    let mut issues = Vec::new();

    for (id, entry) in &snapshot.files {
        let abs = vault.file_path(&entry.path);
        if !abs.is_file() {
            issues.push(IndexIssue {
                kind: "missing_file".to_string(),
                cast_id: id.clone(),
                path: entry.path.clone(),
                detail: None,
            });
            continue;
        }

        let actual_id = identity::id_of_file(&abs)?;
        if actual_id.as_deref() != Some(id.as_str()) {
            issues.push(IndexIssue {
                kind: "id_mismatch".to_string(),
                cast_id: id.clone(),
                path: entry.path.clone(),
                detail: actual_id,
            });
        }

        let content = fsutil::read_utf8(&abs)?;
        let normalized = normalize::normalize(&content, &vault.config.ephemeral_keys)?;
        if normalized.body_digest != entry.body_digest {
            issues.push(IndexIssue {
                kind: "digest_mismatch".to_string(),
                cast_id: id.clone(),
                path: entry.path.clone(),
                detail: Some(normalized.body_digest),
            });
        }
    }

    let selector = vault.config.selector()?;
    for (id, paths) in identity::find_duplicates(vault.root(), &selector)? {
        for path in paths {
            issues.push(IndexIssue {
                kind: "duplicate_id".to_string(),
                cast_id: id.clone(),
                path,
                detail: None,
            });
        }
    }

    Ok(issues)
}

fn entry_from(file: &PendingFile, normalized: &Normalized, header: &frontmatter::Header) -> IndexEntry {
    let title = Path::new(&file.rel)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.rel.clone());

    IndexEntry {
        path: file.rel.clone(),
        title,
        size: file.size,
        mtime_ms: file.mtime_ms,
        digest: normalized.full_digest.clone(),
        body_digest: normalized.body_digest.clone(),
        cast_type: frontmatter::get_str(header, TYPE_KEY).map(String::from),
        cast_vaults: frontmatter::get_str_seq(header, VAULTS_KEY),
        cast_version: frontmatter::get_str(header, VERSION_KEY)
            .unwrap_or("1")
            .to_string(),
    }
}

fn insert_checked(snapshot: &mut IndexSnapshot, id: String, entry: IndexEntry) -> Result<()> {
    if let Some(existing) = snapshot.files.get(&id) {
        let mut paths = vec![existing.path.clone(), entry.path.clone()];
        paths.sort();
        return Err(CastError::DuplicateId { id, paths });
    }
    snapshot.files.insert(id, entry);
    Ok(())
}

/// Identity fixes that must land on disk before digesting: id injection for
/// cast-metadata files, and id-first reordering.
fn fix_pending(
    vault: &Vault,
    pending: &mut Vec<PendingFile>,
    skipped: &mut Vec<SkippedFile>,
) -> Result<()> {
    let mut drop_indices = Vec::new();

    for (i, file) in pending.iter_mut().enumerate() {
        let rewritten = match identity::inject_id(&file.content) {
            Ok(Some((content, id))) => {
                debug!(path = %file.rel, id = %id, "injected cast-id");
                Some(content)
            }
            Ok(None) => match identity::ensure_id_first(&file.content) {
                Ok(reordered) => reordered,
                Err(CastError::MalformedHeader(_)) => {
                    skipped.push(SkippedFile {
                        path: file.rel.clone(),
                        reason: "malformed header block".to_string(),
                    });
                    drop_indices.push(i);
                    continue;
                }
                Err(e) => return Err(e),
            },
            Err(CastError::MalformedHeader(_)) => {
                skipped.push(SkippedFile {
                    path: file.rel.clone(),
                    reason: "malformed header block".to_string(),
                });
                drop_indices.push(i);
                continue;
            }
            Err(e) => return Err(e),
        };

        if let Some(content) = rewritten {
            let abs = vault.file_path(&file.rel);
            fsutil::atomic_write(&abs, content.as_bytes())?;
            let meta = fs::metadata(&abs).map_err(|e| CastError::FileRead {
                path: abs,
                source: e,
            })?;
            file.size = meta.len();
            file.mtime_ms = mtime_millis(&meta);
            file.content = content;
        }
    }

    for i in drop_indices.into_iter().rev() {
        pending.remove(i);
    }
    Ok(())
}

/// Normalize and digest pending files on a fixed worker set pulling from a
/// shared queue. Results come back in input order.
fn digest_parallel<'a>(
    pending: &'a [PendingFile],
    ephemeral: &[String],
) -> Vec<(&'a PendingFile, Result<Normalized>)> {
    if pending.is_empty() {
        return Vec::new();
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DIGEST_WORKERS)
        .min(pending.len());

    let cursor = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<Result<Normalized>>>> =
        Mutex::new((0..pending.len()).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                if i >= pending.len() {
                    break;
                }
                let outcome = normalize::normalize(&pending[i].content, ephemeral);
                slots.lock().unwrap()[i] = Some(outcome);
            });
        }
    });

    let slots = slots.into_inner().unwrap();
    pending
        .iter()
        .zip(slots)
        .map(|(file, slot)| (file, slot.expect("worker filled every slot")))
        .collect()
}

fn mtime_millis(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{vault_with_files, write_note};

    #[test]
    fn build_indexes_files_with_identifiers() {
        let (dir, vault) = vault_with_files(
            "alpha",
            &[(
                "note.md",
                "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\ncast-vaults:\n- alpha (sync)\n- beta (sync)\n---\nhello\n",
            )],
        );

        let built = build(&vault, BuildMode::Rebuild, false).unwrap();
        assert_eq!(built.snapshot.files.len(), 1);
        let entry = built
            .snapshot
            .lookup_by_id("550e8400-e29b-41d4-a716-446655440000")
            .unwrap();
        assert_eq!(entry.path, "note.md");
        assert_eq!(entry.title, "note");
        assert_eq!(entry.cast_vaults.len(), 2);
        assert!(entry.body_digest.starts_with("sha256:"));
        drop(dir);
    }

    #[test]
    fn headerless_and_plain_files_stay_unindexed() {
        let (dir, vault) = vault_with_files(
            "alpha",
            &[
                ("plain.md", "no header at all\n"),
                ("local.md", "---\ntitle: Local only\n---\nbody\n"),
            ],
        );

        let built = build(&vault, BuildMode::Rebuild, false).unwrap();
        assert!(built.snapshot.files.is_empty());
        assert!(built.skipped.is_empty());
        drop(dir);
    }

    #[test]
    fn auto_fix_injects_ids_for_cast_metadata() {
        let (dir, vault) = vault_with_files(
            "alpha",
            &[(
                "note.md",
                "---\ncast-vaults:\n- alpha (sync)\n- beta (sync)\n---\nhello\n",
            )],
        );

        // Without auto_fix the file is reported, not indexed.
        let built = build(&vault, BuildMode::Rebuild, false).unwrap();
        assert!(built.snapshot.files.is_empty());
        assert_eq!(built.skipped.len(), 1);

        // With auto_fix an id is injected and persisted as the first key.
        let built = build(&vault, BuildMode::Rebuild, true).unwrap();
        assert_eq!(built.snapshot.files.len(), 1);
        let on_disk = std::fs::read_to_string(vault.file_path("note.md")).unwrap();
        assert!(on_disk.starts_with("---\ncast-id: "));
        drop(dir);
    }

    #[test]
    fn incremental_build_reuses_unchanged_entries_and_drops_orphans() {
        let (dir, vault) = vault_with_files(
            "alpha",
            &[
                (
                    "keep.md",
                    "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\ncast-type: Note\n---\nkeep\n",
                ),
                (
                    "gone.md",
                    "---\ncast-id: 650e8400-e29b-41d4-a716-446655440000\ncast-type: Note\n---\ngone\n",
                ),
            ],
        );

        let first = build(&vault, BuildMode::Rebuild, false).unwrap();
        assert_eq!(first.snapshot.files.len(), 2);

        std::fs::remove_file(vault.file_path("gone.md")).unwrap();
        let second = build(&vault, BuildMode::Incremental, false).unwrap();
        assert_eq!(second.snapshot.files.len(), 1);
        assert!(second
            .snapshot
            .lookup_by_id("550e8400-e29b-41d4-a716-446655440000")
            .is_some());
        drop(dir);
    }

    #[test]
    fn duplicate_identifiers_abort_the_build() {
        let (dir, vault) = vault_with_files(
            "alpha",
            &[
                (
                    "one.md",
                    "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\ncast-type: Note\n---\na\n",
                ),
                (
                    "two.md",
                    "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\ncast-type: Note\n---\nb\n",
                ),
            ],
        );

        let result = build(&vault, BuildMode::Rebuild, false);
        match result {
            Err(CastError::DuplicateId { id, paths }) => {
                assert_eq!(id, "550e8400-e29b-41d4-a716-446655440000");
                assert_eq!(paths, vec!["one.md".to_string(), "two.md".to_string()]);
            }
            other => panic!("expected DuplicateId, got {other:?}"),
        }
        drop(dir);
    }

    #[test]
    fn oversize_files_are_skipped_and_reported() {
        let (dir, mut vault) = vault_with_files("alpha", &[]);
        vault.config.max_file_size = Some(16);
        write_note(
            &vault,
            "big.md",
            "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\n---\nthis body is comfortably past sixteen bytes\n",
        );

        let built = build(&vault, BuildMode::Rebuild, false).unwrap();
        assert!(built.snapshot.files.is_empty());
        assert_eq!(built.skipped.len(), 1);
        assert!(built.skipped[0].reason.contains("exceeds limit"));
        drop(dir);
    }

    #[test]
    fn verify_reports_drift() {
        let (dir, vault) = vault_with_files(
            "alpha",
            &[(
                "note.md",
                "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\ncast-type: Note\n---\nhello\n",
            )],
        );

        let built = build(&vault, BuildMode::Rebuild, false).unwrap();
        assert!(verify(&vault, &built.snapshot).unwrap().is_empty());

        // Edit the body behind the index's back.
        write_note(
            &vault,
            "note.md",
            "---\ncast-id: 550e8400-e29b-41d4-a716-446655440000\ncast-type: Note\n---\nchanged\n",
        );
        let issues = verify(&vault, &built.snapshot).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "digest_mismatch");
        drop(dir);
    }
}
