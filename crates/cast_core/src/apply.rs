//! The applier: execute a plan against a destination vault.
//!
//! Runs under the destination's exclusive lock. Every file write is atomic
//! (temp + fsync + rename), so a crash at any point leaves either the
//! pre-state or the post-state of a target, never a partial write. Per-action
//! failures are recorded and do not abort the run; the peer journals are
//! updated only for actions that completed, and the next run recomputes
//! classifications from whatever state the filesystem is in.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::error::{CastError, Result};
use crate::frontmatter::{self, Header, CONFLICT_KEY, ID_KEY, RESERVED_PREFIX};
use crate::fsutil;
use crate::index::{self, BuildMode, IndexSnapshot};
use crate::lock::{VaultLock, DEFAULT_TIMEOUT};
use crate::merge;
use crate::normalize::{self, normalize_line_endings};
use crate::objects::ObjectStore;
use crate::participation::SyncMode;
use crate::peers::{LastResult, PeerState, PeerUpdate};
use crate::plan::{self, ActionKind, Plan, PlanOptions, PlannedAction};
use crate::report::{ActionResult, ActionStatus, RunReport};
use crate::vault::Vault;

/// Options for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Inject missing identifiers while indexing (mutates both vaults).
    pub auto_fix: bool,
    /// Operator-forced mode (mirror overpower).
    pub mode_override: Option<SyncMode>,
    /// Bound on destination lock acquisition.
    pub lock_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            auto_fix: false,
            mode_override: None,
            lock_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Cooperative cancellation flag, observed at action boundaries only; an
/// in-progress atomic write always completes or is invisible.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next action boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a finished sync run produced.
#[derive(Debug)]
pub struct SyncOutcome {
    /// The plan that was executed.
    pub plan: Plan,
    /// Per-action outcomes.
    pub report: RunReport,
}

/// Plan a sync without applying anything (dry run).
pub fn plan_vaults(
    source_root: &Path,
    dest_root: &Path,
    options: &SyncOptions,
) -> Result<Plan> {
    let src = Vault::open(source_root)?;
    let dst = Vault::open(dest_root)?;

    let src_index = index::build(&src, BuildMode::Incremental, false)?.snapshot;
    let dst_index = index::build(&dst, BuildMode::Incremental, false)?.snapshot;
    let src_peer = PeerState::load(&src, dst.id())?;
    let dst_peer = PeerState::load(&dst, src.id())?;
    let baselines = ObjectStore::open(dst.objects_dir())?;

    Ok(plan::plan(
        src.id(),
        dst.id(),
        &src_index,
        &dst_index,
        &src_peer,
        &dst_peer,
        &baselines,
        &plan_options(&dst, options),
    ))
}

/// Synchronize `source_root` into `dest_root`: index both vaults, plan, and
/// apply the plan under the destination's exclusive lock.
pub fn sync_vaults(
    source_root: &Path,
    dest_root: &Path,
    options: &SyncOptions,
    cancel: &CancelToken,
) -> Result<SyncOutcome> {
    let src = Vault::open(source_root)?;
    let dst = Vault::open(dest_root)?;

    // The source is read-only during apply; it only needs its own lock while
    // an auto-fix index build may rewrite files.
    let src_index = if options.auto_fix {
        let _guard = VaultLock::acquire(&src.lock_path(), options.lock_timeout)?;
        index::build(&src, BuildMode::Incremental, true)?.snapshot
    } else {
        index::build(&src, BuildMode::Incremental, false)?.snapshot
    };

    let _lock = VaultLock::acquire(&dst.lock_path(), options.lock_timeout)?;
    let mut dst_index = index::build(&dst, BuildMode::Incremental, options.auto_fix)?.snapshot;

    let mut src_peer = PeerState::load(&src, dst.id())?;
    let mut dst_peer = PeerState::load(&dst, src.id())?;
    let src_objects = ObjectStore::open(src.objects_dir())?;
    let dst_objects = ObjectStore::open(dst.objects_dir())?;

    let plan = plan::plan(
        src.id(),
        dst.id(),
        &src_index,
        &dst_index,
        &src_peer,
        &dst_peer,
        &dst_objects,
        &plan_options(&dst, options),
    );
    info!(
        source = src.id(),
        dest = dst.id(),
        total = plan.actions.len(),
        create = plan.summary.create,
        update = plan.summary.update,
        merge = plan.summary.merge,
        conflict = plan.summary.conflict,
        "plan ready"
    );

    let mut applier = Applier {
        src: &src,
        dst: &dst,
        dst_index: &mut dst_index,
        src_peer: &mut src_peer,
        dst_peer: &mut dst_peer,
        src_objects,
        dst_objects,
    };
    let report = applier.apply(&plan, cancel);

    dst_index.save(&dst)?;
    src_peer.mark_synced();
    src_peer.save()?;
    dst_peer.mark_synced();
    dst_peer.save()?;

    Ok(SyncOutcome { plan, report })
}

fn plan_options(dst: &Vault, options: &SyncOptions) -> PlanOptions {
    PlanOptions {
        mode_override: options.mode_override,
        mirror_deletes: dst.config.mirror_deletes,
    }
}

struct Applier<'a> {
    src: &'a Vault,
    dst: &'a Vault,
    dst_index: &'a mut IndexSnapshot,
    src_peer: &'a mut PeerState,
    dst_peer: &'a mut PeerState,
    src_objects: ObjectStore,
    dst_objects: ObjectStore,
}

impl Applier<'_> {
    fn apply(&mut self, plan: &Plan, cancel: &CancelToken) -> RunReport {
        let mut report = RunReport::default();

        for action in &plan.actions {
            let path = action
                .dest_path
                .clone()
                .or_else(|| action.source_path.clone())
                .unwrap_or_default();

            if cancel.is_cancelled() {
                report.push(ActionResult {
                    cast_id: action.cast_id.clone(),
                    kind: action.kind,
                    path,
                    status: ActionStatus::Cancelled,
                    detail: None,
                });
                continue;
            }

            let outcome = match action.kind {
                ActionKind::Create => self.apply_create(action),
                ActionKind::Update => self.apply_update(action),
                ActionKind::Skip => self.apply_skip(action),
                ActionKind::Merge => self.apply_merge(action),
                ActionKind::Conflict => self.apply_conflict(action),
                ActionKind::Delete => self.apply_delete(action),
            };

            match outcome {
                Ok((status, detail)) => report.push(ActionResult {
                    cast_id: action.cast_id.clone(),
                    kind: action.kind,
                    path,
                    status,
                    detail,
                }),
                Err(e) => {
                    warn!(cast_id = %action.cast_id, error = %e, "action failed");
                    report.push(ActionResult {
                        cast_id: action.cast_id.clone(),
                        kind: action.kind,
                        path,
                        status: ActionStatus::Failed,
                        detail: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }

    /// Copy a document into the destination, keeping only reserved header
    /// keys; local keys never cross vault boundaries on CREATE.
    fn apply_create(&mut self, action: &PlannedAction) -> Result<(ActionStatus, Option<String>)> {
        let src_rel = action.source_path.as_deref().expect("CREATE has a source");
        let content = fsutil::read_utf8(&self.src.file_path(src_rel))?;
        let doc = frontmatter::parse(&normalize_line_endings(&content))?;
        let src_header = doc.header.unwrap_or_default();

        let header = reserved_only(&src_header);
        let final_content = frontmatter::serialize(&header, &doc.body)?;

        let mut dest_rel = action.dest_path.clone().expect("CREATE has a destination");
        let mut detail = None;
        let dest_abs = self.dst.file_path(&dest_rel);
        if dest_abs.exists() {
            let occupant = crate::identity::id_of_file(&dest_abs).unwrap_or(None);
            if occupant.as_deref() != Some(action.cast_id.as_str()) {
                let collision = CastError::PathCollision { path: dest_abs };
                dest_rel = collision_path(&dest_rel, &action.cast_id);
                detail = Some(format!("{collision}; renamed to {dest_rel}"));
                warn!(cast_id = %action.cast_id, renamed = %dest_rel, "path collision");
            }
        }

        self.write_document(&dest_rel, &final_content)?;
        self.record_agreement(action, &doc.body, Some(&dest_rel), LastResult::Create)?;
        debug!(cast_id = %action.cast_id, path = %dest_rel, "created");
        Ok((ActionStatus::Applied, detail))
    }

    /// Overwrite the destination body from the source, preserving the
    /// destination's local header keys.
    fn apply_update(&mut self, action: &PlannedAction) -> Result<(ActionStatus, Option<String>)> {
        let src_rel = action.source_path.as_deref().expect("UPDATE has a source");
        let dest_rel = action.dest_path.clone().expect("UPDATE has a destination");

        let src_content = fsutil::read_utf8(&self.src.file_path(src_rel))?;
        let dst_content = fsutil::read_utf8(&self.dst.file_path(&dest_rel))?;
        let src_doc = frontmatter::parse(&normalize_line_endings(&src_content))?;
        let dst_doc = frontmatter::parse(&normalize_line_endings(&dst_content))?;

        let header = if action.mode == SyncMode::Mirror {
            // Mirror replaces the destination wholesale, like CREATE.
            reserved_only(&src_doc.header.unwrap_or_default())
        } else {
            merge::merge_headers(
                &src_doc.header.unwrap_or_default(),
                &dst_doc.header.unwrap_or_default(),
                &self.dst.config.ephemeral_keys,
            )
        };
        let final_content = frontmatter::serialize(&header, &src_doc.body)?;

        self.write_document(&dest_rel, &final_content)?;
        self.record_agreement(action, &src_doc.body, Some(&dest_rel), LastResult::Update)?;
        debug!(cast_id = %action.cast_id, path = %dest_rel, "updated");
        Ok((ActionStatus::Applied, None))
    }

    /// No filesystem change. When both sides already agree, seed the baseline
    /// so later divergence can three-way merge instead of conflicting.
    fn apply_skip(&mut self, action: &PlannedAction) -> Result<(ActionStatus, Option<String>)> {
        let refreshable = action.source_digest.is_some()
            && action.source_digest == action.dest_digest
            && action.dest_path.is_some();
        if refreshable {
            let dest_rel = action.dest_path.clone().expect("checked above");
            let content = fsutil::read_utf8(&self.dst.file_path(&dest_rel))?;
            let doc = frontmatter::parse(&normalize_line_endings(&content))?;
            self.record_agreement(action, &doc.body, Some(&dest_rel), LastResult::Skip)?;
        }
        Ok((ActionStatus::Skipped, None))
    }

    /// Three-way merge. Clean merges land in place and advance the baseline;
    /// unresolved hunks materialize a sibling conflict file and leave both
    /// the destination and the baseline untouched.
    fn apply_merge(&mut self, action: &PlannedAction) -> Result<(ActionStatus, Option<String>)> {
        let src_rel = action.source_path.as_deref().expect("MERGE has a source");
        let dest_rel = action.dest_path.clone().expect("MERGE has a destination");

        let base_content = match action.base_digest.as_deref() {
            Some(digest) => self.dst_objects.get(digest)?.unwrap_or_default(),
            None => String::new(),
        };
        let src_content = fsutil::read_utf8(&self.src.file_path(src_rel))?;
        let dst_content = fsutil::read_utf8(&self.dst.file_path(&dest_rel))?;

        let outcome = merge::merge_documents(
            &base_content,
            &src_content,
            &dst_content,
            self.src.id(),
            self.dst.id(),
            &self.dst.config.ephemeral_keys,
        )?;

        if outcome.is_clean() {
            self.write_document(&dest_rel, &outcome.merged)?;
            let merged_doc = frontmatter::parse(&outcome.merged)?;
            self.record_agreement(action, &merged_doc.body, Some(&dest_rel), LastResult::Merge)?;
            debug!(cast_id = %action.cast_id, path = %dest_rel, "merged cleanly");
            Ok((ActionStatus::Applied, None))
        } else {
            let conflict_rel = self.materialize_conflict(&dest_rel, &outcome.merged)?;
            self.record_conflict(action);
            info!(
                cast_id = %action.cast_id,
                hunks = outcome.hunks.len(),
                conflict = %conflict_rel,
                "merge left unresolved hunks"
            );
            Ok((ActionStatus::Conflicted, Some(conflict_rel)))
        }
    }

    /// Planner-direct conflict: interleave the whole bodies under markers.
    fn apply_conflict(&mut self, action: &PlannedAction) -> Result<(ActionStatus, Option<String>)> {
        let src_rel = action.source_path.as_deref().expect("CONFLICT has a source");
        let dest_rel = action.dest_path.clone().expect("CONFLICT has a destination");

        let src_content = fsutil::read_utf8(&self.src.file_path(src_rel))?;
        let dst_content = fsutil::read_utf8(&self.dst.file_path(&dest_rel))?;
        let src_doc = frontmatter::parse(&normalize_line_endings(&src_content))?;
        let dst_doc = frontmatter::parse(&normalize_line_endings(&dst_content))?;

        let body = merge::conflict_document(
            src_doc.body.trim_end_matches('\n'),
            dst_doc.body.trim_end_matches('\n'),
            self.src.id(),
            self.dst.id(),
        );
        let mut header = Header::new();
        header.insert(
            ID_KEY.to_string(),
            Value::String(action.cast_id.clone()),
        );
        let content = frontmatter::serialize(&header, &body)?;

        let conflict_rel = self.materialize_conflict(&dest_rel, &content)?;
        self.record_conflict(action);
        info!(cast_id = %action.cast_id, conflict = %conflict_rel, "conflict materialized");
        Ok((ActionStatus::Conflicted, Some(conflict_rel)))
    }

    /// Deletion propagation is declined by design: record, never remove.
    fn apply_delete(&mut self, action: &PlannedAction) -> Result<(ActionStatus, Option<String>)> {
        warn!(
            cast_id = %action.cast_id,
            path = action.dest_path.as_deref().unwrap_or(""),
            "mirror delete planned; deletion propagation is disabled"
        );
        Ok((
            ActionStatus::Skipped,
            Some("deletion not propagated".to_string()),
        ))
    }

    /// Atomic write through the destination's line-ending policy, then
    /// refresh its index entry.
    fn write_document(&mut self, dest_rel: &str, content: &str) -> Result<()> {
        let output = fsutil::apply_line_endings(content, self.dst.config.line_endings);
        fsutil::atomic_write(&self.dst.file_path(dest_rel), output.as_bytes())?;
        index::index_single(self.dst, self.dst_index, dest_rel)?;
        Ok(())
    }

    /// Store the agreed body as the new baseline in both vaults' object
    /// stores and journal the agreement on both sides.
    fn record_agreement(
        &mut self,
        action: &PlannedAction,
        body: &str,
        dest_rel: Option<&str>,
        result: LastResult,
    ) -> Result<()> {
        let baseline = normalize::normalize_body(body);
        let digest = self.src_objects.put(&baseline)?;
        self.dst_objects.put(&baseline)?;

        let update = PeerUpdate {
            base_obj: Some(digest.clone()),
            source_digest: Some(digest.clone()),
            dest_digest: Some(digest),
            dest_path: dest_rel.map(String::from),
            last_result: Some(result),
        };
        self.src_peer.update(&action.cast_id, update.clone());
        self.dst_peer.update(&action.cast_id, update);
        Ok(())
    }

    /// Journal a conflict without touching digests or the baseline, so a
    /// recoverable ancestor survives for the eventual resolution.
    fn record_conflict(&mut self, action: &PlannedAction) {
        let update = PeerUpdate {
            last_result: Some(LastResult::Conflict),
            ..Default::default()
        };
        self.src_peer.update(&action.cast_id, update.clone());
        self.dst_peer.update(&action.cast_id, update);
    }

    /// Write conflict content to a timestamped sibling of the destination
    /// file, tagging its header; the destination itself is never touched.
    fn materialize_conflict(&mut self, dest_rel: &str, content: &str) -> Result<String> {
        let doc = frontmatter::parse(content)?;
        let mut header = doc.header.unwrap_or_default();
        header.insert(
            CONFLICT_KEY.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        let tagged = frontmatter::serialize(&frontmatter::order_reserved_first(&header), &doc.body)?;

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let conflict_rel = match dest_rel.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}.conflicted-{stamp}.{ext}"),
            None => format!("{dest_rel}.conflicted-{stamp}"),
        };

        let output = fsutil::apply_line_endings(&tagged, self.dst.config.line_endings);
        fsutil::atomic_write(&self.dst.file_path(&conflict_rel), output.as_bytes())?;
        Ok(conflict_rel)
    }
}

/// The source header filtered to reserved keys, identifier first.
fn reserved_only(header: &Header) -> Header {
    let filtered: Header = header
        .iter()
        .filter(|(k, _)| k.starts_with(RESERVED_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    frontmatter::order_reserved_first(&filtered)
}

/// Destination path for an incoming file whose planned path is occupied by a
/// different identifier: suffix the stem with the id's first hex group.
fn collision_path(dest_rel: &str, cast_id: &str) -> String {
    let tag: String = cast_id.chars().take(8).collect();
    match dest_rel.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{tag}.{ext}"),
        None => format!("{dest_rel}-{tag}"),
    }
}
