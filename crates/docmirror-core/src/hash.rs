//! Content hashing and document identity.
//!
//! Both functions produce lowercase SHA-256 hex digests. Content is
//! normalized before hashing so that line-ending churn or trailing
//! whitespace introduced by a source's editor does not register as a change.

use sha2::{Digest, Sha256};

use crate::models::RawDocument;

/// Normalize content for change detection: CRLF/CR become LF, trailing
/// whitespace is stripped from every line, and the whole text is trimmed.
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}

/// SHA-256 of the normalized content.
pub fn content_hash(content: &str) -> String {
    sha256_hex(normalize_content(content).as_bytes())
}

/// Stable identity of a document within its source.
///
/// Uses the URL when present, otherwise title + content. Callers must keep
/// a source on one scheme: switching orphans existing catalog rows.
pub fn external_id(doc: &RawDocument) -> String {
    match doc.url.as_deref() {
        Some(url) if !url.is_empty() => sha256_hex(url.as_bytes()),
        _ => {
            let mut hasher = Sha256::new();
            hasher.update(doc.title.as_bytes());
            hasher.update(doc.content.as_bytes());
            format!("{:x}", hasher.finalize())
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
