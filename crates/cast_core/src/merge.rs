//! Three-way merge for structured Markdown documents.
//!
//! The merge runs in two phases. Header merge is key-wise: reserved keys are
//! taken from the source (it is authoritative for cross-vault identity and
//! routing), everything else from the destination (local vaults keep their
//! own categorization). Body merge is block-wise over top-level heading
//! boundaries; blocks both sides edited differently become unresolved hunks
//! carrying both competing contents.
//!
//! Unresolved hunks are a first-class outcome, not an error.

use std::ops::Range;

use crate::error::Result;
use crate::frontmatter::{self, Header, KeyClass, ID_KEY};
use crate::normalize::normalize_line_endings;

/// A pair of competing contents the merge could not auto-resolve.
#[derive(Debug, Clone)]
pub struct MergeHunk {
    /// The heading line of the block in conflict, `None` for the preface.
    pub heading: Option<String>,
    /// Byte range of the marker block within the merged output.
    pub range: Range<usize>,
    /// The source side's content.
    pub source: String,
    /// The destination side's content.
    pub dest: String,
}

/// Result of a three-way merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The merged document (with marker blocks where hunks remain).
    pub merged: String,
    /// Unresolved hunks, empty for a clean merge.
    pub hunks: Vec<MergeHunk>,
}

impl MergeOutcome {
    /// Whether the merge resolved everything.
    pub fn is_clean(&self) -> bool {
        self.hunks.is_empty()
    }
}

/// Merge three versions of a document.
///
/// Inputs are full document contents (header plus body); `base` is the last
/// agreed baseline. Hunk markers are labeled with the two vault identifiers.
pub fn merge_documents(
    base: &str,
    source: &str,
    dest: &str,
    src_vault_id: &str,
    dst_vault_id: &str,
    ephemeral_keys: &[String],
) -> Result<MergeOutcome> {
    let base_doc = frontmatter::parse(&normalize_line_endings(base))?;
    let src_doc = frontmatter::parse(&normalize_line_endings(source))?;
    let dst_doc = frontmatter::parse(&normalize_line_endings(dest))?;

    let header = merge_headers(
        &src_doc.header.clone().unwrap_or_default(),
        &dst_doc.header.clone().unwrap_or_default(),
        ephemeral_keys,
    );

    let (body, body_hunks) = merge_bodies(
        &base_doc.body,
        &src_doc.body,
        &dst_doc.body,
        src_vault_id,
        dst_vault_id,
    );

    let merged = frontmatter::serialize(&header, &body)?;
    // Hunk offsets were computed within the body; shift past the header.
    let shift = merged.len() - body.len();
    let hunks = body_hunks
        .into_iter()
        .map(|h| MergeHunk {
            range: h.range.start + shift..h.range.end + shift,
            ..h
        })
        .collect();

    Ok(MergeOutcome { merged, hunks })
}

/// Key-wise header merge.
///
/// The identifier comes first; other keys follow the destination's original
/// order where possible, with source-only keys appended after. Ephemeral
/// keys never cross from the source.
pub fn merge_headers(src: &Header, dst: &Header, ephemeral_keys: &[String]) -> Header {
    let mut merged = Header::new();

    if let Some(id) = src.get(ID_KEY).or_else(|| dst.get(ID_KEY)) {
        merged.insert(ID_KEY.to_string(), id.clone());
    }

    for (key, value) in dst {
        if key == ID_KEY {
            continue;
        }
        match frontmatter::classify(key, ephemeral_keys) {
            KeyClass::Reserved => {
                if let Some(src_value) = src.get(key) {
                    merged.insert(key.clone(), src_value.clone());
                }
                // Reserved keys the source dropped are dropped here too.
            }
            KeyClass::Ephemeral | KeyClass::Local => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    for (key, value) in src {
        if merged.contains_key(key) || key == ID_KEY {
            continue;
        }
        if frontmatter::classify(key, ephemeral_keys) == KeyClass::Ephemeral {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    merged
}

/// Split a body into `(heading line, content)` blocks at top-level headings.
/// The first block may have an empty heading (the preface).
fn split_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut heading = String::new();
    let mut content: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.starts_with("# ") {
            if !heading.is_empty() || !content.is_empty() {
                blocks.push((heading, content.join("\n")));
            }
            heading = line.to_string();
            content = Vec::new();
        } else {
            content.push(line);
        }
    }
    if !heading.is_empty() || !content.is_empty() {
        blocks.push((heading, content.join("\n")));
    }

    blocks
}

/// Content of a side's block, `None` when the side has no such heading at
/// all. The distinction matters: a deleted block must not resurrect its
/// heading, while a present-but-emptied block keeps it.
fn block_content<'a>(blocks: &'a [(String, String)], heading: &str) -> Option<&'a str> {
    blocks
        .iter()
        .find(|(h, _)| h == heading)
        .map(|(_, c)| c.as_str())
}

/// All headings, source order first, destination-only headings appended.
fn all_headings(src: &[(String, String)], dst: &[(String, String)]) -> Vec<String> {
    let mut headings = Vec::new();
    for (h, _) in src.iter().chain(dst.iter()) {
        if !headings.contains(h) {
            headings.push(h.clone());
        }
    }
    headings
}

enum Piece {
    Text(String),
    Conflict {
        heading: String,
        source: String,
        dest: String,
    },
}

/// Block-wise body merge. Returns the merged body and hunks with byte ranges
/// relative to it.
fn merge_bodies(
    base: &str,
    source: &str,
    dest: &str,
    src_vault_id: &str,
    dst_vault_id: &str,
) -> (String, Vec<MergeHunk>) {
    if source == dest || dest == base {
        return (source.to_string(), Vec::new());
    }
    if source == base {
        return (dest.to_string(), Vec::new());
    }

    let base_blocks = split_blocks(base);
    let src_blocks = split_blocks(source);
    let dst_blocks = split_blocks(dest);

    let mut pieces = Vec::new();
    for heading in all_headings(&src_blocks, &dst_blocks) {
        let b = block_content(&base_blocks, &heading);
        let s = block_content(&src_blocks, &heading);
        let d = block_content(&dst_blocks, &heading);

        let sc = s.unwrap_or("");
        let dc = d.unwrap_or("");
        let bc = b.unwrap_or("");

        // Resolve to (content, heading survives). A side that deleted the
        // whole block wins with no heading line either; a side that merely
        // emptied the body keeps its bare heading.
        let resolved = if sc == dc {
            Some((sc, s.is_some() || d.is_some()))
        } else if sc == bc {
            Some((dc, d.is_some()))
        } else if dc == bc {
            Some((sc, s.is_some()))
        } else {
            // Append-mostly documents: a strict prefix is not a conflict;
            // take the longer side.
            let st = sc.trim_end();
            let dt = dc.trim_end();
            if dt.starts_with(st) {
                Some((dc, d.is_some()))
            } else if st.starts_with(dt) {
                Some((sc, s.is_some()))
            } else {
                None
            }
        };

        match resolved {
            Some((content, heading_survives)) => {
                if !heading.is_empty() && heading_survives {
                    pieces.push(Piece::Text(heading.clone()));
                }
                if !content.is_empty() {
                    pieces.push(Piece::Text(content.to_string()));
                }
            }
            None => {
                if !heading.is_empty() {
                    pieces.push(Piece::Text(heading.clone()));
                }
                pieces.push(Piece::Conflict {
                    heading: heading.clone(),
                    source: sc.to_string(),
                    dest: dc.to_string(),
                });
            }
        }
    }

    assemble(pieces, src_vault_id, dst_vault_id)
}

fn assemble(
    pieces: Vec<Piece>,
    src_vault_id: &str,
    dst_vault_id: &str,
) -> (String, Vec<MergeHunk>) {
    let mut merged = String::new();
    let mut hunks = Vec::new();

    for piece in pieces {
        if !merged.is_empty() {
            merged.push('\n');
        }
        match piece {
            Piece::Text(text) => merged.push_str(&text),
            Piece::Conflict {
                heading,
                source,
                dest,
            } => {
                let block = format!(
                    "<<<<<<< {src_vault_id}\n{source}\n=======\n{dest}\n>>>>>>> {dst_vault_id}"
                );
                let start = merged.len();
                merged.push_str(&block);
                hunks.push(MergeHunk {
                    heading: (!heading.is_empty()).then_some(heading),
                    range: start..merged.len(),
                    source,
                    dest,
                });
            }
        }
    }

    (merged, hunks)
}

/// Build the conflict document for a planner-direct CONFLICT: the whole
/// source and destination bodies interleaved under one marker block.
pub fn conflict_document(
    source_body: &str,
    dest_body: &str,
    src_vault_id: &str,
    dst_vault_id: &str,
) -> String {
    format!(
        "<<<<<<< {src_vault_id}\n{source_body}\n=======\n{dest_body}\n>>>>>>> {dst_vault_id}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    const NO_EPHEMERAL: &[String] = &[];

    fn header(pairs: &[(&str, &str)]) -> Header {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn reserved_keys_come_from_source_locals_from_destination() {
        let src = header(&[
            (ID_KEY, "u"),
            ("cast-vaults", "src-routing"),
            ("tags", "src-tags"),
        ]);
        let dst = header(&[
            ("tags", "dst-tags"),
            (ID_KEY, "u"),
            ("cast-vaults", "dst-routing"),
            ("category", "dst-cat"),
        ]);

        let merged = merge_headers(&src, &dst, NO_EPHEMERAL);
        let keys: Vec<_> = merged.keys().cloned().collect();
        assert_eq!(keys, vec![ID_KEY, "tags", "cast-vaults", "category"]);
        assert_eq!(merged["cast-vaults"], Value::String("src-routing".into()));
        assert_eq!(merged["tags"], Value::String("dst-tags".into()));
    }

    #[test]
    fn source_only_keys_are_appended() {
        let src = header(&[(ID_KEY, "u"), ("cast-type", "Note"), ("author", "a")]);
        let dst = header(&[(ID_KEY, "u"), ("tags", "t")]);

        let merged = merge_headers(&src, &dst, NO_EPHEMERAL);
        let keys: Vec<_> = merged.keys().cloned().collect();
        assert_eq!(keys, vec![ID_KEY, "tags", "cast-type", "author"]);
    }

    #[test]
    fn ephemeral_keys_never_cross_from_source() {
        let ephemeral = vec!["updated".to_string()];
        let src = header(&[(ID_KEY, "u"), ("updated", "2099")]);
        let dst = header(&[(ID_KEY, "u"), ("updated", "2020")]);

        let merged = merge_headers(&src, &dst, &ephemeral);
        assert_eq!(merged["updated"], Value::String("2020".into()));
    }

    #[test]
    fn one_sided_body_change_merges_cleanly() {
        let out = merge_documents(
            "hello\n",
            "hello world\n",
            "hello\n",
            "alpha",
            "beta",
            NO_EPHEMERAL,
        )
        .unwrap();
        assert!(out.is_clean());
        assert_eq!(out.merged, "hello world\n");

        let out = merge_documents(
            "hello\n",
            "hello\n",
            "hello there\n",
            "alpha",
            "beta",
            NO_EPHEMERAL,
        )
        .unwrap();
        assert!(out.is_clean());
        assert_eq!(out.merged, "hello there\n");
    }

    #[test]
    fn divergent_section_edits_become_a_hunk() {
        let base = "hello\n\n# Section\nbase\n";
        let source = "hello\n\n# Section\naaa\n";
        let dest = "hello\n\n# Section\nbbb\n";

        let out =
            merge_documents(base, source, dest, "alpha", "beta", NO_EPHEMERAL).unwrap();
        assert_eq!(out.hunks.len(), 1);
        let hunk = &out.hunks[0];
        assert_eq!(hunk.heading.as_deref(), Some("# Section"));
        assert!(out.merged.contains("<<<<<<< alpha"));
        assert!(out.merged.contains(">>>>>>> beta"));
        // The recorded range covers exactly the marker block.
        let block = &out.merged[hunk.range.clone()];
        assert!(block.starts_with("<<<<<<< alpha"));
        assert!(block.ends_with(">>>>>>> beta"));
        assert!(block.contains("aaa"));
        assert!(block.contains("bbb"));
    }

    #[test]
    fn untouched_sections_survive_a_conflict_elsewhere() {
        let base = "# Keep\nsame\n\n# Fight\nbase\n";
        let source = "# Keep\nsame\n\n# Fight\nsrc\n";
        let dest = "# Keep\nsame\n\n# Fight\ndst\n";

        let out =
            merge_documents(base, source, dest, "alpha", "beta", NO_EPHEMERAL).unwrap();
        assert_eq!(out.hunks.len(), 1);
        assert!(out.merged.contains("# Keep\nsame"));
    }

    #[test]
    fn prefix_containment_takes_the_longer_side() {
        // Both sides changed the block; destination is source plus additions.
        let out = merge_documents(
            "hello\n",
            "hello\nworld\n",
            "hello\nworld\nagain\n",
            "alpha",
            "beta",
            NO_EPHEMERAL,
        )
        .unwrap();
        assert!(out.is_clean());
        assert!(out.merged.contains("hello\nworld\nagain"));

        // And symmetrically when the source is longer.
        let out = merge_documents(
            "hello\n",
            "hello\nworld\n",
            "hello\n\n",
            "alpha",
            "beta",
            NO_EPHEMERAL,
        )
        .unwrap();
        assert!(out.is_clean());
        assert!(out.merged.contains("hello\nworld"));
    }

    #[test]
    fn whole_block_deletion_on_one_side_wins_without_its_heading() {
        // Dest deleted the entire section (heading and body) while source
        // only touched the preface; the merge must not resurrect a bare
        // heading that exists in neither side's file.
        let base = "intro\n\n# Section\nold content\n";
        let source = "intro MODIFIED\n\n# Section\nold content\n";
        let dest = "intro\n";

        let out =
            merge_documents(base, source, dest, "alpha", "beta", NO_EPHEMERAL).unwrap();
        assert!(out.is_clean());
        assert!(out.merged.contains("intro MODIFIED"));
        assert!(!out.merged.contains("# Section"));
    }

    #[test]
    fn emptied_block_keeps_its_bare_heading() {
        // Dest cleared the section body but kept the heading.
        let base = "intro\n\n# Section\nold\n";
        let source = "intro CHANGED\n\n# Section\nold\n";
        let dest = "intro\n\n# Section\n";

        let out =
            merge_documents(base, source, dest, "alpha", "beta", NO_EPHEMERAL).unwrap();
        assert!(out.is_clean());
        assert!(out.merged.contains("intro CHANGED"));
        assert!(out.merged.contains("# Section"));
    }

    #[test]
    fn sections_added_on_each_side_are_both_kept() {
        let base = "intro\n";
        let source = "intro\n\n# From Source\ns\n";
        let dest = "intro\n\n# From Dest\nd\n";

        let out =
            merge_documents(base, source, dest, "alpha", "beta", NO_EPHEMERAL).unwrap();
        assert!(out.is_clean());
        assert!(out.merged.contains("# From Source"));
        assert!(out.merged.contains("# From Dest"));
    }

    #[test]
    fn identical_additions_collapse_to_one_copy() {
        let base = "intro\n";
        let added = "intro\n\n# New\nsame text\n";

        let out = merge_documents(base, added, added, "alpha", "beta", NO_EPHEMERAL).unwrap();
        assert!(out.is_clean());
        assert_eq!(out.merged.matches("# New").count(), 1);
    }

    #[test]
    fn conflict_document_interleaves_whole_bodies() {
        let doc = conflict_document("src body\n", "dst body\n", "alpha", "beta");
        assert!(doc.starts_with("<<<<<<< alpha\n"));
        assert!(doc.contains("src body"));
        assert!(doc.contains("=======\n"));
        assert!(doc.contains("dst body"));
        assert!(doc.trim_end().ends_with(">>>>>>> beta"));
    }
}
