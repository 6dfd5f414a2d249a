//! # Content Hashing
//!
//! SHA-256 digests used for change detection. All digests are lowercase
//! 64-character hex strings.
//!
//! ## Meta Hash Canonical Form
//! ```text
//! {"title":…,"hPath":…,"parentId":…,"sortIndex":…,"sortOrder":…,"icon":…}
//! ```
//! Field order is fixed by the struct declaration below and `sortIndex` is
//! rounded to 6 decimals, so float noise from the host never registers as a
//! metadata change.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::types::DocDraft;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Hashes arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hashes a markdown body.
pub fn content_hash(markdown: &str) -> String {
    sha256_hex(markdown.as_bytes())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalMeta<'a> {
    title: &'a str,
    h_path: &'a str,
    parent_id: &'a str,
    sort_index: f64,
    sort_order: i64,
    icon: &'a str,
}

/// Rounds a sort index to 6 decimals.
pub fn round_sort_index(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let rounded = (value * 1_000_000.0).round() / 1_000_000.0;
    // Normalise -0.0 so it serialises identically to 0.0
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Hashes the canonical JSON of a document's metadata.
pub fn meta_hash(doc: &DocDraft) -> Result<String, CoreError> {
    let canonical = CanonicalMeta {
        title: &doc.title,
        h_path: &doc.h_path,
        parent_id: &doc.parent_id,
        sort_index: round_sort_index(doc.sort_index),
        sort_order: doc.sort_order,
        icon: &doc.icon,
    };
    let json = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(&json))
}

/// Coerces a server-supplied hash to lowercase 64-hex, or empty when it is
/// not a digest at all.
pub fn normalize_hash(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() == HASH_HEX_LEN && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        trimmed.to_ascii_lowercase()
    } else {
        String::new()
    }
}
