use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for Cast engine operations.
///
/// Per-file structural errors (`MalformedHeader`, `Encoding`) are reported and
/// the file is skipped; vault-wide structural errors (`DuplicateId`,
/// `IndexCorrupted`) abort the run. Planning-level conditions (a recorded
/// baseline whose object vanished, an ineligible vault pair) never surface
/// here: the planner downgrades them to CONFLICT and SKIP actions.
#[derive(Debug, Error)]
pub enum CastError {
    /// General error for any kind of I/O issue not otherwise documented here.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A file could not be read.
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to be read
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A file could not be written.
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to be written
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A header block had frontmatter delimiters but no parseable mapping.
    #[error("Malformed header block in '{0}'")]
    MalformedHeader(PathBuf),

    /// File content was not valid UTF-8.
    #[error("Invalid UTF-8 content in '{0}'")]
    Encoding(PathBuf),

    /// Two or more indexed files carry the same identifier. Fatal for the
    /// vault: no sync can proceed until the operator resolves it.
    #[error("Duplicate cast-id {id} in files: {}", paths.join(", "))]
    DuplicateId {
        /// The duplicated identifier
        id: String,
        /// All paths carrying it, relative to the vault root
        paths: Vec<String>,
    },

    /// The persisted index could not be deserialized.
    #[error("Index file '{path}' is corrupted: {detail}")]
    IndexCorrupted {
        /// Path to the index document
        path: PathBuf,
        /// Parser diagnostic
        detail: String,
    },

    /// An incoming file's destination path is occupied by a file with a
    /// different identifier.
    #[error("Path collision at '{path}': occupied by a different cast-id")]
    PathCollision {
        /// The occupied destination path
        path: PathBuf,
    },

    /// Error from invalid/unparseable YAML (headers or config).
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error from serializing or deserializing JSON state documents.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A vault configuration file could not be parsed.
    #[error("Config parse error in '{path}': {source}")]
    ConfigParse {
        /// Path to the config file
        path: PathBuf,
        /// Underlying YAML error
        source: serde_yaml::Error,
    },

    /// The vault declares a protocol version this engine does not speak.
    /// Refusing to operate beats risking data corruption.
    #[error("Unsupported cast-version '{found}' (supported: {supported})")]
    UnsupportedVersion {
        /// Version declared by the vault config
        found: String,
        /// Version this engine implements
        supported: String,
    },

    /// No `.cast/config.yaml` was found under the given root.
    #[error("Not a Cast vault: '{0}'")]
    VaultNotFound(PathBuf),

    /// An include or exclude glob pattern failed to compile.
    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern text
        pattern: String,
        /// Underlying glob error
        source: glob::PatternError,
    },

    /// The destination vault lock could not be acquired within the timeout.
    #[error("Timed out after {seconds}s waiting for lock '{path}'")]
    LockTimeout {
        /// Path to the lock file
        path: PathBuf,
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// A lock file left behind by a dead process could not be reclaimed.
    #[error("Stale lock '{path}' (holder pid {pid} is gone) could not be reclaimed")]
    StaleLock {
        /// Path to the lock file
        path: PathBuf,
        /// PID recorded by the dead holder
        pid: u32,
    },
}

/// Result type alias for Cast engine operations.
pub type Result<T> = std::result::Result<T, CastError>;

impl CastError {
    /// Engine-level exit code surfaced to the CLI for this error.
    ///
    /// 2 configuration error, 4 filesystem/structural error, 5 lock timeout.
    /// (0 success and 3 unresolved-conflicts come from the run report, not
    /// from an error.)
    pub fn exit_code(&self) -> i32 {
        match self {
            CastError::ConfigParse { .. }
            | CastError::UnsupportedVersion { .. }
            | CastError::VaultNotFound(_)
            | CastError::Pattern { .. } => 2,
            CastError::LockTimeout { .. } | CastError::StaleLock { .. } => 5,
            _ => 4,
        }
    }
}
