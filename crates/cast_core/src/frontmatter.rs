//! Header-block (YAML frontmatter) parsing and manipulation.
//!
//! A header block is the mapping between `---` delimiters at the start of a
//! document. Keys are classified into three buckets that drive digest
//! inclusion and merge policy uniformly: reserved (`cast-` prefix, synced
//! across vaults), ephemeral (configured, excluded from digests and merges),
//! and local (preserved per vault).

use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::PathBuf;

use crate::error::{CastError, Result};

/// Reserved key prefix; keys starting with it are synchronized across vaults.
pub const RESERVED_PREFIX: &str = "cast-";
/// The document identifier key. Always the first header key.
pub const ID_KEY: &str = "cast-id";
/// The vault-participation list key.
pub const VAULTS_KEY: &str = "cast-vaults";
/// The document type key.
pub const TYPE_KEY: &str = "cast-type";
/// The protocol version key.
pub const VERSION_KEY: &str = "cast-version";
/// The codebase list key.
pub const CODEBASES_KEY: &str = "cast-codebases";
/// Marker key added to materialized conflict files.
pub const CONFLICT_KEY: &str = "cast-conflict";

/// Serialization order for reserved keys after `cast-id`.
const RESERVED_ORDER: [&str; 4] = [TYPE_KEY, VERSION_KEY, VAULTS_KEY, CODEBASES_KEY];

/// An ordered header mapping.
pub type Header = IndexMap<String, Value>;

/// Result of splitting a document into header and body.
#[derive(Debug, Clone)]
pub struct ParsedDoc {
    /// The parsed header block, if the document has one.
    pub header: Option<Header>,
    /// The body content after the header block (or the whole document).
    pub body: String,
}

impl ParsedDoc {
    /// The header, or an empty mapping if absent.
    pub fn header_or_empty(&self) -> Header {
        self.header.clone().unwrap_or_default()
    }
}

/// Which merge/digest bucket a header key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// Synchronized across vaults; the source side is authoritative.
    Reserved,
    /// Excluded from digests and merges entirely.
    Ephemeral,
    /// Preserved per vault; the destination side is authoritative.
    Local,
}

/// Classify a header key given the configured ephemeral-key list.
///
/// Ephemeral classification wins over the reserved prefix so an operator can
/// exclude a misbehaving `cast-` key from digests if they must.
pub fn classify(key: &str, ephemeral_keys: &[String]) -> KeyClass {
    if ephemeral_keys.iter().any(|k| k == key) {
        KeyClass::Ephemeral
    } else if key.starts_with(RESERVED_PREFIX) {
        KeyClass::Reserved
    } else {
        KeyClass::Local
    }
}

/// Parse a document into header and body.
///
/// Content must already be LF-normalized. A document without a leading
/// delimiter, or without a closing delimiter, is all body. Delimiters
/// enclosing YAML that is not a mapping fail with
/// [`CastError::MalformedHeader`].
pub fn parse(content: &str) -> Result<ParsedDoc> {
    if !content.starts_with("---\n") {
        return Ok(ParsedDoc {
            header: None,
            body: content.to_string(),
        });
    }

    let rest = &content[4..];
    let Some(end_idx) = rest.find("\n---\n") else {
        // No closing delimiter: treat the whole document as body.
        return Ok(ParsedDoc {
            header: None,
            body: content.to_string(),
        });
    };

    let header_str = &rest[..end_idx];
    let body = &rest[end_idx + 5..];

    let header: Header = serde_yaml::from_str(header_str)
        .map_err(|_| CastError::MalformedHeader(PathBuf::new()))?;

    Ok(ParsedDoc {
        header: Some(header),
        body: body.to_string(),
    })
}

/// Serialize a header block and body back into document content.
///
/// An empty header collapses to the bare body.
pub fn serialize(header: &Header, body: &str) -> Result<String> {
    if header.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(header)?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Reorder a header so `cast-id` comes first, followed by the remaining
/// reserved keys in their standard order, then local keys in their original
/// order, then any leftover reserved keys.
pub fn order_reserved_first(header: &Header) -> Header {
    let mut ordered = Header::new();

    if let Some(id) = header.get(ID_KEY) {
        ordered.insert(ID_KEY.to_string(), id.clone());
    }
    for key in RESERVED_ORDER {
        if let Some(value) = header.get(key) {
            ordered.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in header {
        if !ordered.contains_key(key) && !key.starts_with(RESERVED_PREFIX) {
            ordered.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in header {
        if !ordered.contains_key(key) {
            ordered.insert(key.clone(), value.clone());
        }
    }

    ordered
}

/// Get a string-valued header key.
pub fn get_str<'a>(header: &'a Header, key: &str) -> Option<&'a str> {
    header.get(key).and_then(|v| v.as_str())
}

/// Get a sequence-valued header key as strings, empty if absent or scalar.
pub fn get_str_seq(header: &Header, key: &str) -> Vec<String> {
    match header.get(key) {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}
