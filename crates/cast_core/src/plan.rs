//! Sync planning: classify every logical file into one action.
//!
//! The planner is a pure function of the two index snapshots, the two peer
//! journals, and baseline-object presence; repeated invocations over the same
//! inputs yield identical action lists. It never touches document content.
//!
//! Ineligible identifiers (participation list missing either vault) are
//! elided before classification, and a recorded baseline whose object has
//! vanished degrades the decision to CONFLICT rather than risking silent
//! data loss. Neither condition is an error.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::index::IndexSnapshot;
use crate::objects::ObjectStore;
use crate::participation::{self, SyncMode};
use crate::peers::{self, PeerState};

/// The kind of action planned for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    /// The document does not exist at the destination yet.
    Create,
    /// Overwrite the destination body from the source.
    Update,
    /// Nothing to do; sides agree (or only the destination moved).
    Skip,
    /// Both sides changed against a common baseline; three-way merge.
    Merge,
    /// Concurrent edits that cannot be auto-merged; materialize a conflict.
    Conflict,
    /// Mirror-mode removal of a destination-only document (opt-in).
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Create => "CREATE",
            ActionKind::Update => "UPDATE",
            ActionKind::Skip => "SKIP",
            ActionKind::Merge => "MERGE",
            ActionKind::Conflict => "CONFLICT",
            ActionKind::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// One planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// The document identifier.
    pub cast_id: String,
    /// What to do.
    pub kind: ActionKind,
    /// Source path relative to the source vault root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Destination path relative to the destination vault root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    /// Source body digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    /// Destination body digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_digest: Option<String>,
    /// Agreed baseline digest, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_digest: Option<String>,
    /// Mode this action was classified under.
    pub mode: SyncMode,
    /// Why the planner chose this action.
    pub reason: String,
}

/// Counts per action kind, for progress reports and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSummary {
    /// Number of CREATE actions.
    pub create: usize,
    /// Number of UPDATE actions.
    pub update: usize,
    /// Number of SKIP actions.
    pub skip: usize,
    /// Number of MERGE actions.
    pub merge: usize,
    /// Number of CONFLICT actions.
    pub conflict: usize,
    /// Number of DELETE actions.
    pub delete: usize,
}

/// An ordered action list for one (source, destination) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Source vault identifier.
    pub source_vault_id: String,
    /// Destination vault identifier.
    pub dest_vault_id: String,
    /// Actions in stable order: destination path, identifier as tie-breaker.
    pub actions: Vec<PlannedAction>,
    /// Counts per kind.
    pub summary: PlanSummary,
}

impl Plan {
    /// Whether any action will leave an unresolved conflict.
    pub fn has_conflicts(&self) -> bool {
        self.summary.conflict > 0
    }
}

/// Inputs that shape classification beyond the indices and journals.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Operator-forced mode (mirror overpower); otherwise derived per file
    /// from the participation roles.
    pub mode_override: Option<SyncMode>,
    /// Whether mirror mode may plan deletions of destination-only files.
    pub mirror_deletes: bool,
}

/// Classify every identifier in the union of both indices.
///
/// `baselines` is the destination's object store; it is probed only for
/// object presence, making the plan deterministic for a given store state.
#[allow(clippy::too_many_arguments)]
pub fn plan(
    source_vault_id: &str,
    dest_vault_id: &str,
    src_index: &IndexSnapshot,
    dst_index: &IndexSnapshot,
    src_peer: &PeerState,
    dst_peer: &PeerState,
    baselines: &ObjectStore,
    options: &PlanOptions,
) -> Plan {
    let mut actions = Vec::new();

    let ids: BTreeSet<&String> = src_index.files.keys().chain(dst_index.files.keys()).collect();

    for id in ids {
        let src_entry = src_index.files.get(id.as_str());
        let dst_entry = dst_index.files.get(id.as_str());

        let vaults = match (src_entry, dst_entry) {
            (Some(e), _) | (None, Some(e)) => &e.cast_vaults,
            (None, None) => continue,
        };
        if !participation::is_eligible(vaults, source_vault_id, dest_vault_id) {
            continue;
        }

        let mode = options.mode_override.unwrap_or_else(|| {
            let src_role = participation::role_of(vaults, source_vault_id)
                .expect("eligibility guarantees the source role");
            let dst_role = participation::role_of(vaults, dest_vault_id)
                .expect("eligibility guarantees the destination role");
            participation::mode_for(src_role, dst_role)
        });

        let action = match (src_entry, dst_entry) {
            (Some(src), None) => PlannedAction {
                cast_id: (*id).clone(),
                kind: ActionKind::Create,
                source_path: Some(src.path.clone()),
                dest_path: Some(src.path.clone()),
                source_digest: Some(src.body_digest.clone()),
                dest_digest: None,
                base_digest: None,
                mode,
                reason: "document does not exist in destination".to_string(),
            },
            (None, Some(dst)) => {
                if mode == SyncMode::Mirror && options.mirror_deletes {
                    PlannedAction {
                        cast_id: (*id).clone(),
                        kind: ActionKind::Delete,
                        source_path: None,
                        dest_path: Some(dst.path.clone()),
                        source_digest: None,
                        dest_digest: Some(dst.body_digest.clone()),
                        base_digest: None,
                        mode,
                        reason: "destination-only document under mirror".to_string(),
                    }
                } else {
                    // Destination keeps documents the source never had.
                    continue;
                }
            }
            (Some(src), Some(dst)) => {
                let kind_reason = classify_both(
                    mode,
                    &src.body_digest,
                    &dst.body_digest,
                    peers::common_baseline(src_peer, dst_peer, id).as_deref(),
                    baselines,
                );
                PlannedAction {
                    cast_id: (*id).clone(),
                    kind: kind_reason.0,
                    source_path: Some(src.path.clone()),
                    dest_path: Some(dst.path.clone()),
                    source_digest: Some(src.body_digest.clone()),
                    dest_digest: Some(dst.body_digest.clone()),
                    base_digest: kind_reason.2,
                    mode,
                    reason: kind_reason.1,
                }
            }
            (None, None) => unreachable!("id came from the union of both indices"),
        };

        actions.push(action);
    }

    actions.sort_by(|a, b| {
        let a_path = a.dest_path.as_deref().unwrap_or("");
        let b_path = b.dest_path.as_deref().unwrap_or("");
        a_path.cmp(b_path).then_with(|| a.cast_id.cmp(&b.cast_id))
    });

    let mut summary = PlanSummary::default();
    for action in &actions {
        match action.kind {
            ActionKind::Create => summary.create += 1,
            ActionKind::Update => summary.update += 1,
            ActionKind::Skip => summary.skip += 1,
            ActionKind::Merge => summary.merge += 1,
            ActionKind::Conflict => summary.conflict += 1,
            ActionKind::Delete => summary.delete += 1,
        }
    }

    Plan {
        source_vault_id: source_vault_id.to_string(),
        dest_vault_id: dest_vault_id.to_string(),
        actions,
        summary,
    }
}

/// Decision table for documents present on both sides.
fn classify_both(
    mode: SyncMode,
    src_digest: &str,
    dst_digest: &str,
    baseline: Option<&str>,
    baselines: &ObjectStore,
) -> (ActionKind, String, Option<String>) {
    if src_digest == dst_digest {
        return (
            ActionKind::Skip,
            "bodies are identical".to_string(),
            baseline.map(String::from),
        );
    }

    if mode == SyncMode::Mirror {
        return (
            ActionKind::Update,
            "mirror mode overwrites the destination".to_string(),
            baseline.map(String::from),
        );
    }

    let Some(base) = baseline else {
        return match mode {
            SyncMode::Broadcast => (
                ActionKind::Update,
                "no baseline; broadcast source is authoritative".to_string(),
                None,
            ),
            _ => (
                ActionKind::Conflict,
                "no common baseline for concurrent versions".to_string(),
                None,
            ),
        };
    };

    if !baselines.has(base) {
        // A recorded baseline without its object would make any merge guess;
        // degrade instead of losing data.
        return (
            ActionKind::Conflict,
            format!("baseline object {base} is missing"),
            Some(base.to_string()),
        );
    }

    let src_changed = src_digest != base;
    let dst_changed = dst_digest != base;

    let (kind, reason) = match (src_changed, dst_changed, mode) {
        (true, false, _) => (ActionKind::Update, "source changed, destination unchanged"),
        (false, true, _) => (ActionKind::Skip, "destination changed, source unchanged"),
        (true, true, SyncMode::Broadcast) => {
            (ActionKind::Update, "broadcast source overrides destination edits")
        }
        (true, true, _) => (ActionKind::Merge, "both sides changed; three-way merge"),
        (false, false, _) => {
            // Digests differ yet both equal the baseline: impossible.
            (ActionKind::Skip, "bodies are identical")
        }
    };
    (kind, reason.to_string(), Some(base.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use crate::peers::{PeerState, PeerUpdate};
    use crate::test_utils::vault_with_files;

    fn entry(path: &str, body_digest: &str, vaults: &[&str]) -> IndexEntry {
        IndexEntry {
            path: path.to_string(),
            title: path.trim_end_matches(".md").to_string(),
            size: 1,
            mtime_ms: 1,
            digest: format!("sha256:full-{body_digest}"),
            body_digest: format!("sha256:{body_digest}"),
            cast_type: None,
            cast_vaults: vaults.iter().map(|s| s.to_string()).collect(),
            cast_version: "1".to_string(),
        }
    }

    fn snapshot(entries: &[(&str, IndexEntry)]) -> IndexSnapshot {
        let mut snapshot = IndexSnapshot::new();
        for (id, entry) in entries {
            snapshot.upsert(id.to_string(), entry.clone());
        }
        snapshot
    }

    struct Fixture {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        src_peer: PeerState,
        dst_peer: PeerState,
        baselines: ObjectStore,
    }

    fn fixture() -> Fixture {
        let (dir_a, vault_a) = vault_with_files("alpha", &[]);
        let (dir_b, vault_b) = vault_with_files("beta", &[]);
        let baselines = ObjectStore::open(vault_b.objects_dir()).unwrap();
        Fixture {
            src_peer: PeerState::load(&vault_a, "beta").unwrap(),
            dst_peer: PeerState::load(&vault_b, "alpha").unwrap(),
            baselines,
            _dirs: (dir_a, dir_b),
        }
    }

    fn record_baseline(f: &mut Fixture, id: &str, digest: &str) {
        for peer in [&mut f.src_peer, &mut f.dst_peer] {
            peer.update(
                id,
                PeerUpdate {
                    base_obj: Some(digest.to_string()),
                    ..Default::default()
                },
            );
        }
    }

    const BOTH: &[&str] = &["alpha (sync)", "beta (sync)"];
    const BROADCAST: &[&str] = &["alpha (cast)", "beta (sync)"];
    const ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn source_only_documents_are_created() {
        let f = fixture();
        let src = snapshot(&[(ID, entry("note.md", "a", BOTH))]);
        let dst = snapshot(&[]);

        let plan = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Create);
        assert_eq!(plan.actions[0].dest_path.as_deref(), Some("note.md"));
        assert_eq!(plan.summary.create, 1);
    }

    #[test]
    fn destination_only_documents_are_left_alone() {
        let f = fixture();
        let src = snapshot(&[]);
        let dst = snapshot(&[(ID, entry("note.md", "a", BOTH))]);

        let plan = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn ineligible_documents_are_elided() {
        let f = fixture();
        let src = snapshot(&[(ID, entry("note.md", "a", &["alpha (sync)", "gamma (sync)"]))]);
        let dst = snapshot(&[]);

        let plan = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn identical_bodies_skip() {
        let f = fixture();
        let src = snapshot(&[(ID, entry("note.md", "same", BOTH))]);
        let dst = snapshot(&[(ID, entry("note.md", "same", BOTH))]);

        let plan = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(plan.actions[0].kind, ActionKind::Skip);
    }

    #[test]
    fn divergence_without_baseline_conflicts_bidirectionally() {
        let f = fixture();
        let src = snapshot(&[(ID, entry("note.md", "a", BOTH))]);
        let dst = snapshot(&[(ID, entry("note.md", "b", BOTH))]);

        let plan = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(plan.actions[0].kind, ActionKind::Conflict);
    }

    #[test]
    fn divergence_without_baseline_updates_in_broadcast() {
        let f = fixture();
        let src = snapshot(&[(ID, entry("note.md", "a", BROADCAST))]);
        let dst = snapshot(&[(ID, entry("note.md", "b", BROADCAST))]);

        let plan = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(plan.actions[0].kind, ActionKind::Update);
    }

    #[test]
    fn baseline_splits_update_skip_and_merge() {
        let mut f = fixture();
        let base_digest = f.baselines.put("base\n").unwrap();
        record_baseline(&mut f, ID, &base_digest);

        let base_hex = base_digest.trim_start_matches("sha256:");

        // Only source changed vs baseline -> UPDATE.
        let src = snapshot(&[(ID, entry("note.md", "new", BOTH))]);
        let dst = snapshot(&[(ID, entry("note.md", base_hex, BOTH))]);
        let p = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(p.actions[0].kind, ActionKind::Update);

        // Only destination changed -> SKIP.
        let src = snapshot(&[(ID, entry("note.md", base_hex, BOTH))]);
        let dst = snapshot(&[(ID, entry("note.md", "new", BOTH))]);
        let p = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(p.actions[0].kind, ActionKind::Skip);

        // Both changed -> MERGE bidirectionally, UPDATE in broadcast.
        let src = snapshot(&[(ID, entry("note.md", "one", BOTH))]);
        let dst = snapshot(&[(ID, entry("note.md", "two", BOTH))]);
        let p = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(p.actions[0].kind, ActionKind::Merge);

        let src = snapshot(&[(ID, entry("note.md", "one", BROADCAST))]);
        let dst = snapshot(&[(ID, entry("note.md", "two", BROADCAST))]);
        let p = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(p.actions[0].kind, ActionKind::Update);
    }

    #[test]
    fn missing_baseline_object_degrades_to_conflict() {
        let mut f = fixture();
        record_baseline(&mut f, ID, "sha256:feedfeed");

        let src = snapshot(&[(ID, entry("note.md", "a", BOTH))]);
        let dst = snapshot(&[(ID, entry("note.md", "b", BOTH))]);

        let p = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        assert_eq!(p.actions[0].kind, ActionKind::Conflict);
        assert!(p.actions[0].reason.contains("missing"));
    }

    #[test]
    fn mirror_overrides_and_may_delete() {
        let f = fixture();
        let src = snapshot(&[(ID, entry("a.md", "one", BOTH))]);
        let other_id = "650e8400-e29b-41d4-a716-446655440000";
        let mut dst = snapshot(&[(ID, entry("a.md", "two", BOTH))]);
        dst.upsert(other_id.to_string(), entry("b.md", "x", BOTH));

        let options = PlanOptions {
            mode_override: Some(SyncMode::Mirror),
            mirror_deletes: true,
        };
        let p = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &options);
        assert_eq!(p.actions.len(), 2);
        assert_eq!(p.actions[0].kind, ActionKind::Update);
        assert_eq!(p.actions[1].kind, ActionKind::Delete);
        assert_eq!(p.actions[1].dest_path.as_deref(), Some("b.md"));
    }

    #[test]
    fn plan_ordering_and_purity() {
        let f = fixture();
        let id_a = "150e8400-e29b-41d4-a716-446655440000";
        let id_b = "250e8400-e29b-41d4-a716-446655440000";
        let mut src = snapshot(&[(id_b, entry("z.md", "a", BOTH))]);
        src.upsert(id_a.to_string(), entry("a.md", "b", BOTH));
        let dst = snapshot(&[]);

        let first = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());
        let second = plan("alpha", "beta", &src, &dst, &f.src_peer, &f.dst_peer, &f.baselines, &PlanOptions::default());

        let paths: Vec<_> = first
            .actions
            .iter()
            .map(|a| a.dest_path.clone().unwrap())
            .collect();
        assert_eq!(paths, vec!["a.md", "z.md"]);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
