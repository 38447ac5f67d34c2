//! Stable per-document identifiers.
//!
//! Every synchronized document carries a `cast-id`: a UUID v4 stored as the
//! first key of its header block. Once assigned it never changes; identity
//! follows content across renames, not paths.

use std::collections::BTreeMap;
use std::path::Path;

use uuid::Uuid;

use crate::error::Result;
use crate::frontmatter::{self, Header, ID_KEY, TYPE_KEY, VAULTS_KEY};
use crate::fsutil;
use crate::normalize::normalize_line_endings;
use crate::select::Selector;

/// Generate a new document identifier (UUID v4, cryptographically random).
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Check whether a string is a valid hyphenated UUID.
pub fn is_valid(value: &str) -> bool {
    value.len() == 36 && Uuid::parse_str(value).is_ok()
}

/// Extract the identifier from a header, if present and valid.
pub fn extract_id(header: &Header) -> Option<String> {
    let id = frontmatter::get_str(header, ID_KEY)?;
    is_valid(id).then(|| id.to_string())
}

/// Whether the identity layer may inject an identifier into this header.
///
/// Files without a `cast-vaults` or `cast-type` key are left untouched.
pub fn wants_id(header: &Header) -> bool {
    extract_id(header).is_none()
        && (header.contains_key(VAULTS_KEY) || header.contains_key(TYPE_KEY))
}

/// Inject a freshly generated identifier as the first header key.
///
/// Returns the rewritten content and the new id, or `None` when the document
/// has no header or is not eligible for injection.
pub fn inject_id(content: &str) -> Result<Option<(String, String)>> {
    let unified = normalize_line_endings(content);
    let doc = frontmatter::parse(&unified)?;
    let Some(header) = doc.header else {
        return Ok(None);
    };
    if !wants_id(&header) {
        return Ok(None);
    }

    let id = generate();
    let mut updated = header;
    updated.insert(ID_KEY.to_string(), serde_yaml::Value::String(id.clone()));
    let ordered = frontmatter::order_reserved_first(&updated);
    let rewritten = frontmatter::serialize(&ordered, &doc.body)?;
    Ok(Some((rewritten, id)))
}

/// Reorder the header so the identifier comes first.
///
/// Returns the rewritten content only when something actually moved.
pub fn ensure_id_first(content: &str) -> Result<Option<String>> {
    let unified = normalize_line_endings(content);
    let doc = frontmatter::parse(&unified)?;
    let Some(header) = doc.header else {
        return Ok(None);
    };
    if !header.contains_key(ID_KEY) || header.keys().next().map(String::as_str) == Some(ID_KEY) {
        return Ok(None);
    }

    let ordered = frontmatter::order_reserved_first(&header);
    Ok(Some(frontmatter::serialize(&ordered, &doc.body)?))
}

/// Read the identifier from a file on disk, if any.
pub fn id_of_file(path: &Path) -> Result<Option<String>> {
    let content = fsutil::read_utf8(path)?;
    let doc = frontmatter::parse(&normalize_line_endings(&content))?;
    Ok(doc.header.as_ref().and_then(extract_id))
}

/// Scan the selected files of a vault for identifiers shared by more than one
/// file. Any non-singleton entry is a fatal inconsistency for that vault.
pub fn find_duplicates(
    root: &Path,
    selector: &Selector,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut id_to_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for rel in selector.select(root)? {
        let path = root.join(&rel);
        // Unreadable or headerless files simply have no identity here;
        // indexing reports them separately.
        let Ok(Some(id)) = id_of_file(&path) else {
            continue;
        };
        id_to_paths.entry(id).or_default().push(rel);
    }

    id_to_paths.retain(|_, paths| paths.len() > 1);
    Ok(id_to_paths)
}
