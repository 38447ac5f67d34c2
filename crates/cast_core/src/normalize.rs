//! Content normalization and digest computation.
//!
//! Canonicalization is deterministic and purely functional: line endings to
//! LF, trailing whitespace stripped, exactly one trailing newline. For digest
//! purposes the header view additionally drops ephemeral keys and orders the
//! remaining keys deterministically, so purely-local header edits never
//! perturb the digests that drive sync decisions.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::frontmatter::{self, Header, ID_KEY};

/// Canonicalized content plus the two digests that drive sync decisions.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Canonical content: LF endings, trimmed lines, single trailing newline.
    pub content: String,
    /// Parsed header block, if present.
    pub header: Option<Header>,
    /// Canonical body (same treatment as `content`, header stripped).
    pub body: String,
    /// SHA-256 over the digest view of header plus body, `sha256:<hex>`.
    pub full_digest: String,
    /// SHA-256 over the canonical body alone, `sha256:<hex>`.
    pub body_digest: String,
}

/// Convert CR-LF and lone CR line endings to LF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Remove trailing whitespace from every line.
pub fn trim_trailing_whitespace(text: &str) -> String {
    text.split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Guarantee exactly one trailing newline. Empty content stays empty.
pub fn ensure_trailing_newline(text: &str) -> String {
    let trimmed = text.trim_end_matches('\n');
    if trimmed.is_empty() && text.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// SHA-256 digest of raw bytes, rendered with the algorithm prefix.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let result = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for b in result.iter() {
        use std::fmt::Write as _;
        let _ = write!(hex, "{b:02x}");
    }
    format!("sha256:{hex}")
}

/// Canonicalize a body fragment: LF endings, trimmed lines, one trailing
/// newline.
pub fn normalize_body(body: &str) -> String {
    ensure_trailing_newline(&trim_trailing_whitespace(&normalize_line_endings(body)))
}

/// Digest of a body fragment after canonicalization.
pub fn body_digest(body: &str) -> String {
    digest_bytes(normalize_body(body).as_bytes())
}

/// Canonicalize full document content and compute both digests.
///
/// `ephemeral_keys` are dropped from the digest view of the header only; the
/// canonical content keeps them. Normalization is idempotent:
/// `normalize(normalize(c)) == normalize(c)`.
pub fn normalize(content: &str, ephemeral_keys: &[String]) -> Result<Normalized> {
    let unified = normalize_line_endings(content);
    let doc = frontmatter::parse(&unified)?;

    let content = ensure_trailing_newline(&trim_trailing_whitespace(&unified));
    let body = ensure_trailing_newline(&trim_trailing_whitespace(&doc.body));

    let digest_view = match &doc.header {
        Some(header) => {
            let view = digest_header_view(header, ephemeral_keys);
            if view.is_empty() {
                body.clone()
            } else {
                let serialized = frontmatter::serialize(&view, &body)?;
                ensure_trailing_newline(&trim_trailing_whitespace(&serialized))
            }
        }
        None => body.clone(),
    };

    Ok(Normalized {
        full_digest: digest_bytes(digest_view.as_bytes()),
        body_digest: digest_bytes(body.as_bytes()),
        header: doc.header,
        body,
        content,
    })
}

/// The header as digested: ephemeral keys dropped, `cast-id` first, the rest
/// in stable lexical order.
fn digest_header_view(header: &Header, ephemeral_keys: &[String]) -> Header {
    let mut keys: Vec<&String> = header
        .keys()
        .filter(|k| k.as_str() != ID_KEY && !ephemeral_keys.iter().any(|e| e == *k))
        .collect();
    keys.sort();

    let mut view = Header::new();
    if let Some(id) = header.get(ID_KEY) {
        view.insert(ID_KEY.to_string(), id.clone());
    }
    for key in keys {
        view.insert(key.clone(), header[key].clone());
    }
    view
}
