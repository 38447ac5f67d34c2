//! Atomic filesystem helpers.
//!
//! Every mutation the engine makes to a vault goes through [`atomic_write`]:
//! a sibling temp file in the target directory, fsync, then rename over the
//! target. The rename is the commit point; a crash before it leaves no
//! visible change.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::LineEnding;
use crate::error::{CastError, Result};

/// Write `content` to `path` atomically (temp file + fsync + rename).
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| CastError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    let wrap = |e: std::io::Error| CastError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(wrap)?;
    use std::io::Write as _;
    tmp.write_all(content).map_err(wrap)?;
    tmp.as_file().sync_all().map_err(wrap)?;
    tmp.persist(path).map_err(|e| CastError::FileWrite {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Read a file into a UTF-8 string, failing with [`CastError::Encoding`] on
/// invalid bytes and [`CastError::FileRead`] on I/O errors.
pub fn read_utf8(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| CastError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    String::from_utf8(bytes).map_err(|_| CastError::Encoding(path.to_path_buf()))
}

/// Rewrite LF line endings according to the configured output policy.
///
/// Engine-internal content is always LF; this runs once, immediately before
/// a destination file is written.
pub fn apply_line_endings(content: &str, policy: LineEnding) -> String {
    match policy {
        LineEnding::Lf => content.to_string(),
        LineEnding::Crlf => content.replace('\n', "\r\n"),
        LineEnding::Native => {
            if cfg!(windows) {
                content.replace('\n', "\r\n")
            } else {
                content.to_string()
            }
        }
    }
}
