#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// The applier: execute plans atomically under the vault lock
pub mod apply;

/// Per-vault configuration (`.cast/config.yaml`)
pub mod config;

/// Error (common error types and exit codes)
pub mod error;

/// Header-block parsing and key classification
pub mod frontmatter;

/// Atomic filesystem helpers
pub mod fsutil;

/// Stable per-document identifiers (cast-id)
pub mod identity;

/// The vault index: identifier -> entry
pub mod index;

/// Advisory exclusive vault locking
pub mod lock;

/// Three-way merge for structured Markdown
pub mod merge;

/// Content normalization and digests
pub mod normalize;

/// Content-addressed baseline store
pub mod objects;

/// Participation lists (cast-vaults) and sync modes
pub mod participation;

/// Per-peer sync journals
pub mod peers;

/// Sync planning
pub mod plan;

/// Run reports and exit codes
pub mod report;

/// File selection (include/exclude globs)
pub mod select;

/// Vault layout and lifecycle
pub mod vault;

#[cfg(test)]
pub mod test_utils;

pub use apply::{plan_vaults, sync_vaults, CancelToken, SyncOptions, SyncOutcome};
pub use config::VaultConfig;
pub use error::{CastError, Result};
pub use participation::{SyncMode, VaultRole};
pub use plan::{ActionKind, Plan};
pub use report::RunReport;
pub use vault::Vault;
