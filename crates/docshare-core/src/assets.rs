//! # Asset Paths
//!
//! Sanitisation of asset paths and extraction of asset references from
//! exported markdown.
//!
//! Every upload path is relative, uses `/` separators and never contains an
//! empty, `.` or `..` segment. Paths that cannot be brought into that form
//! are rejected.

use std::collections::HashSet;

use crate::error::ValidationError;

/// Directory prefix the host uses for embedded assets.
pub const ASSET_PREFIX: &str = "assets/";

/// Normalises an asset path for upload.
///
/// Strips URL query/fragment suffixes, converts backslashes, drops leading
/// `/` and `./`, and collapses repeated separators.
pub fn sanitize_asset_path(raw: &str) -> Result<String, ValidationError> {
    let without_suffix = raw
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\\', "/");

    let mut segments = Vec::new();
    for segment in without_suffix.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ValidationError::InvalidAssetPath(raw.to_string())),
            s if s.chars().any(|c| c.is_control()) => {
                return Err(ValidationError::InvalidAssetPath(raw.to_string()))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(ValidationError::InvalidAssetPath(raw.to_string()));
    }
    Ok(segments.join("/"))
}

/// Collects the distinct `assets/…` references in a markdown body, in order
/// of first appearance.
///
/// Recognises markdown link/image targets `](assets/…)` and HTML attributes
/// `src="assets/…"` / `href="assets/…"`.
pub fn collect_asset_refs(markdown: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    let mut push = |candidate: &str| {
        if let Ok(path) = sanitize_asset_path(candidate) {
            if path.starts_with(ASSET_PREFIX) && seen.insert(path.clone()) {
                refs.push(path);
            }
        }
    };

    for (idx, _) in markdown.match_indices("](") {
        let rest = &markdown[idx + 2..];
        let target = rest
            .split(|c: char| c == ')' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .trim_matches(&['<', '>'][..]);
        push(target);
    }

    for attr in ["src=\"", "href=\"", "src='", "href='"] {
        let quote = if attr.ends_with('"') { '"' } else { '\'' };
        for (idx, _) in markdown.match_indices(attr) {
            let rest = &markdown[idx + attr.len()..];
            if let Some(end) = rest.find(quote) {
                push(&rest[..end]);
            }
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_asset_path() {
        assert_eq!(sanitize_asset_path("/assets/a.png").unwrap(), "assets/a.png");
        assert_eq!(sanitize_asset_path("./assets//b.png").unwrap(), "assets/b.png");
        assert_eq!(sanitize_asset_path("assets\\c.png?v=2").unwrap(), "assets/c.png");
        assert!(sanitize_asset_path("assets/../secret").is_err());
        assert!(sanitize_asset_path("").is_err());
        assert!(sanitize_asset_path("/").is_err());
    }

    #[test]
    fn test_collect_asset_refs() {
        let md = "![img](assets/a.png) and [file](assets/doc.pdf \"title\")\n\
                  <img src=\"assets/b.png\"> again ![dup](assets/a.png)\n\
                  [external](https://example.com/x.png)";
        assert_eq!(
            collect_asset_refs(md),
            vec!["assets/a.png", "assets/doc.pdf", "assets/b.png"]
        );
    }
}
