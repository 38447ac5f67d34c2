//! Per-peer sync journals.
//!
//! For each ordered vault pair (local, remote) the local vault keeps one
//! journal at `.cast/peers/<peer-id>.json`: identifier -> the digests and
//! outcome of the last sync touching that document. The journal is the sole
//! authority for baseline selection in planning. The planner reads it; only
//! the applier writes it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CastError, Result};
use crate::fsutil;
use crate::vault::Vault;

/// Outcome recorded for the last sync of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LastResult {
    /// The document was created at the destination.
    Create,
    /// The destination was overwritten from the source.
    Update,
    /// A three-way merge was applied cleanly.
    Merge,
    /// The sync left an unresolved conflict.
    Conflict,
    /// Nothing needed to change.
    Skip,
}

/// Journal entry for one identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Source body digest at last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    /// Destination body digest at last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_digest: Option<String>,
    /// Digest of the baseline object both sides agreed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_obj: Option<String>,
    /// Destination path at last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    /// Outcome of the last sync touching this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<LastResult>,
    /// When that outcome was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_at: Option<DateTime<Utc>>,
}

/// Field-wise update applied through [`PeerState::update`]. `None` fields are
/// left unchanged.
#[derive(Debug, Clone, Default)]
pub struct PeerUpdate {
    /// New baseline object digest.
    pub base_obj: Option<String>,
    /// New source digest.
    pub source_digest: Option<String>,
    /// New destination digest.
    pub dest_digest: Option<String>,
    /// New destination path.
    pub dest_path: Option<String>,
    /// New outcome; also stamps `last_at`.
    pub last_result: Option<LastResult>,
}

/// On-disk journal document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalDoc {
    peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    files: BTreeMap<String, PeerEntry>,
}

/// One vault's journal for one peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    path: PathBuf,
    doc: JournalDoc,
}

impl PeerState {
    /// Load the journal a vault keeps for `peer_id`, empty if none exists.
    pub fn load(vault: &Vault, peer_id: &str) -> Result<Self> {
        let path = vault.peers_dir().join(format!("{peer_id}.json"));
        let doc = if path.is_file() {
            let content = fsutil::read_utf8(&path)?;
            serde_json::from_str(&content).map_err(CastError::Json)?
        } else {
            JournalDoc {
                peer_id: peer_id.to_string(),
                last_sync: None,
                files: BTreeMap::new(),
            }
        };
        Ok(Self { path, doc })
    }

    /// The peer this journal tracks.
    pub fn peer_id(&self) -> &str {
        &self.doc.peer_id
    }

    /// When this pair last completed a sync.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.doc.last_sync
    }

    /// Journal entry for an identifier.
    pub fn entry(&self, cast_id: &str) -> Option<&PeerEntry> {
        self.doc.files.get(cast_id)
    }

    /// Baseline object digest recorded for an identifier.
    pub fn base_digest(&self, cast_id: &str) -> Option<&str> {
        self.entry(cast_id).and_then(|e| e.base_obj.as_deref())
    }

    /// Apply a field-wise update to one identifier's entry.
    pub fn update(&mut self, cast_id: &str, update: PeerUpdate) {
        let entry = self.doc.files.entry(cast_id.to_string()).or_default();
        if update.base_obj.is_some() {
            entry.base_obj = update.base_obj;
        }
        if update.source_digest.is_some() {
            entry.source_digest = update.source_digest;
        }
        if update.dest_digest.is_some() {
            entry.dest_digest = update.dest_digest;
        }
        if update.dest_path.is_some() {
            entry.dest_path = update.dest_path;
        }
        if let Some(result) = update.last_result {
            entry.last_result = Some(result);
            entry.last_at = Some(Utc::now());
        }
    }

    /// Remove the entry for an identifier.
    pub fn remove(&mut self, cast_id: &str) -> Option<PeerEntry> {
        self.doc.files.remove(cast_id)
    }

    /// Drop entries for identifiers no longer present in the index.
    pub fn prune<'a>(&mut self, active_ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let keep: std::collections::BTreeSet<&str> = active_ids.into_iter().collect();
        let removed: Vec<String> = self
            .doc
            .files
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &removed {
            self.doc.files.remove(id);
        }
        removed
    }

    /// All baseline digests referenced by this journal.
    pub fn referenced_baselines(&self) -> std::collections::BTreeSet<String> {
        self.doc
            .files
            .values()
            .filter_map(|e| e.base_obj.clone())
            .collect()
    }

    /// Stamp the journal-level sync time.
    pub fn mark_synced(&mut self) {
        self.doc.last_sync = Some(Utc::now());
    }

    /// Persist the journal atomically.
    pub fn save(&self) -> Result<()> {
        fsutil::atomic_write_json(&self.path, &self.doc)
    }
}

/// The baseline both sides agree on for an identifier, if any.
///
/// Bidirectional sync maintains one journal per side; a baseline is only
/// trusted when both record the same object digest.
pub fn common_baseline(src: &PeerState, dst: &PeerState, cast_id: &str) -> Option<String> {
    let src_base = src.base_digest(cast_id)?;
    let dst_base = dst.base_digest(cast_id)?;
    (src_base == dst_base).then(|| src_base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::vault_with_files;

    #[test]
    fn journal_round_trips_through_disk() {
        let (dir, vault) = vault_with_files("alpha", &[]);

        let mut state = PeerState::load(&vault, "beta").unwrap();
        state.update(
            "id-1",
            PeerUpdate {
                base_obj: Some("sha256:aaa".to_string()),
                source_digest: Some("sha256:aaa".to_string()),
                dest_digest: Some("sha256:aaa".to_string()),
                dest_path: Some("note.md".to_string()),
                last_result: Some(LastResult::Create),
            },
        );
        state.mark_synced();
        state.save().unwrap();

        let reloaded = PeerState::load(&vault, "beta").unwrap();
        let entry = reloaded.entry("id-1").unwrap();
        assert_eq!(entry.base_obj.as_deref(), Some("sha256:aaa"));
        assert_eq!(entry.last_result, Some(LastResult::Create));
        assert!(entry.last_at.is_some());
        assert!(reloaded.last_sync().is_some());
        drop(dir);
    }

    #[test]
    fn update_leaves_unset_fields_alone() {
        let (dir, vault) = vault_with_files("alpha", &[]);
        let mut state = PeerState::load(&vault, "beta").unwrap();

        state.update(
            "id-1",
            PeerUpdate {
                base_obj: Some("sha256:aaa".to_string()),
                ..Default::default()
            },
        );
        state.update(
            "id-1",
            PeerUpdate {
                last_result: Some(LastResult::Skip),
                ..Default::default()
            },
        );

        let entry = state.entry("id-1").unwrap();
        assert_eq!(entry.base_obj.as_deref(), Some("sha256:aaa"));
        assert_eq!(entry.last_result, Some(LastResult::Skip));
        drop(dir);
    }

    #[test]
    fn common_baseline_requires_agreement() {
        let (dir_a, vault_a) = vault_with_files("alpha", &[]);
        let (dir_b, vault_b) = vault_with_files("beta", &[]);

        let mut a_for_b = PeerState::load(&vault_a, "beta").unwrap();
        let mut b_for_a = PeerState::load(&vault_b, "alpha").unwrap();

        assert!(common_baseline(&a_for_b, &b_for_a, "id-1").is_none());

        a_for_b.update(
            "id-1",
            PeerUpdate {
                base_obj: Some("sha256:aaa".to_string()),
                ..Default::default()
            },
        );
        assert!(common_baseline(&a_for_b, &b_for_a, "id-1").is_none());

        b_for_a.update(
            "id-1",
            PeerUpdate {
                base_obj: Some("sha256:aaa".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(
            common_baseline(&a_for_b, &b_for_a, "id-1").as_deref(),
            Some("sha256:aaa")
        );

        b_for_a.update(
            "id-1",
            PeerUpdate {
                base_obj: Some("sha256:bbb".to_string()),
                ..Default::default()
            },
        );
        assert!(common_baseline(&a_for_b, &b_for_a, "id-1").is_none());
        drop((dir_a, dir_b));
    }

    #[test]
    fn prune_drops_stale_identifiers() {
        let (dir, vault) = vault_with_files("alpha", &[]);
        let mut state = PeerState::load(&vault, "beta").unwrap();
        state.update("live", PeerUpdate::default());
        state.update("dead", PeerUpdate::default());

        let removed = state.prune(["live"]);
        assert_eq!(removed, vec!["dead".to_string()]);
        assert!(state.entry("live").is_some());
        assert!(state.entry("dead").is_none());
        drop(dir);
    }
}
