//! Run reports: per-action outcomes and the exit code they imply.
//!
//! The applier does not abort once its transaction has begun; it records
//! failures per action and keeps going so a single broken file cannot block a
//! large sync. The collected report drives the engine-level exit code.

use serde::Serialize;

use crate::plan::ActionKind;

/// How one planned action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The action was applied successfully.
    Applied,
    /// Nothing needed to change.
    Skipped,
    /// A conflict file was materialized; the destination is untouched.
    Conflicted,
    /// The action failed; later actions still ran.
    Failed,
    /// The run was cancelled before this action started.
    Cancelled,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// The document identifier.
    pub cast_id: String,
    /// The planned action kind.
    pub kind: ActionKind,
    /// Destination-relative path the action targeted.
    pub path: String,
    /// How it ended.
    pub status: ActionStatus,
    /// Extra detail: error text, conflict-file path, collision note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The collected outcome of one sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Per-action outcomes, in plan order.
    pub results: Vec<ActionResult>,
}

impl RunReport {
    /// Record an outcome.
    pub fn push(&mut self, result: ActionResult) {
        self.results.push(result);
    }

    /// Actions that ended in an unresolved conflict.
    pub fn conflicts(&self) -> impl Iterator<Item = &ActionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ActionStatus::Conflicted)
    }

    /// Actions that failed outright.
    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ActionStatus::Failed)
    }

    /// Engine-level exit code: 0 success, 3 unresolved conflicts remain,
    /// 4 filesystem error during apply.
    pub fn exit_code(&self) -> i32 {
        if self.failures().next().is_some() {
            4
        } else if self.conflicts().next().is_some() {
            3
        } else {
            0
        }
    }
}
