//! File selection: resolve include/exclude glob patterns against a vault root.
//!
//! Patterns support `*`, `**`, `?`, and character classes, with `**` matching
//! zero or more path segments. Matching happens on forward-slash relative
//! paths. Symbolic links are not followed; hidden files are excluded unless
//! explicitly opted in; the `.cast/` state directory is always excluded.

use std::path::Path;

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::error::{CastError, Result};
use crate::vault::CAST_DIR;

/// Compiled include/exclude pattern sets for one vault.
#[derive(Debug, Clone)]
pub struct Selector {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    include_hidden: bool,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| CastError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        // `*` must not cross directory boundaries; `**` still does.
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

impl Selector {
    /// Compile a selector from raw glob pattern lists.
    pub fn new(include: &[String], exclude: &[String], include_hidden: bool) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
            include_hidden,
        })
    }

    /// Whether a forward-slash relative path passes the pattern sets.
    pub fn matches(&self, rel: &str) -> bool {
        let options = match_options();
        self.include
            .iter()
            .any(|p| p.matches_with(rel, options))
            && !self.exclude.iter().any(|p| p.matches_with(rel, options))
    }

    /// Yield the relative paths of all regular files under `root` matching at
    /// least one include pattern and no exclude pattern, sorted by path.
    ///
    /// Output is stable under repeated calls when the filesystem is unchanged.
    pub fn select(&self, root: &Path) -> Result<Vec<String>> {
        let include_hidden = self.include_hidden;
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                if name == CAST_DIR {
                    return false;
                }
                include_hidden || !name.starts_with('.')
            });

        let mut selected = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| CastError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if self.matches(&rel) {
                selected.push(rel);
            }
        }

        selected.sort();
        Ok(selected)
    }
}
