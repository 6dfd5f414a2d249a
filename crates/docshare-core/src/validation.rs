//! # Validation Module
//!
//! Shape checks for ids arriving from the host or from the server.
//!
//! ## Id Rules
//! - 1 to 64 characters
//! - ASCII alphanumerics, `-` and `_` only
//!
//! Remote snapshot entries that fail these checks are dropped during
//! normalisation rather than failing the whole diff.
//!
//! ## Usage
//! ```rust
//! use docshare_core::validation::{is_valid_id, validate_share_id};
//!
//! assert!(is_valid_id("20240101120000-abcdefg"));
//! assert!(validate_share_id("").is_err());
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest id accepted from either side.
pub const MAX_ID_LEN: usize = 64;

/// Returns true if `id` has the shape of a document/share id.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validates a document id supplied by the host.
pub fn validate_doc_id(id: &str) -> ValidationResult<()> {
    validate_id("docId", id)
}

/// Validates a share id before it is sent to the server.
pub fn validate_share_id(id: &str) -> ValidationResult<()> {
    validate_id("shareId", id)
}

fn validate_id(field: &'static str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    if !is_valid_id(id) {
        return Err(ValidationError::InvalidId {
            field,
            value: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("20240101120000-abcdefg"));
        assert!(is_valid_id("doc_1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id(&"a".repeat(MAX_ID_LEN + 1)));
    }

    #[test]
    fn test_validate_share_id_errors() {
        assert_eq!(
            validate_share_id("  "),
            Err(ValidationError::Required { field: "shareId" })
        );
        assert!(matches!(
            validate_doc_id("a/b"),
            Err(ValidationError::InvalidId { field: "docId", .. })
        ));
        assert!(validate_doc_id("ok-id").is_ok());
    }
}
