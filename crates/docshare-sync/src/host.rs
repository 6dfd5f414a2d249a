//! # Host Collaborators
//!
//! What the engine needs from the editor hosting it: markdown export, asset
//! bytes and document metadata.
//!
//! ## Metadata Probes
//! Hosts differ in how document metadata can be recovered (different query
//! endpoints, schema versions). Each strategy is a [`DocMetaProbe`]; a
//! [`ProbeChain`] tries them in order:
//!
//! ```text
//!   probe 1 ──► Ok(Some(meta)) ───────────────────────────► use it
//!      │
//!      ├──► Ok(None) / Err(e) (logged) ──► probe 2 ──► ...
//!                                                    │
//!                              all exhausted ◄───────┘
//!                                    │
//!                                    ▼
//!                 minimal meta: title = last hPath segment
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SyncResult;

// =============================================================================
// Host Data
// =============================================================================

/// Markdown export of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportedDoc {
    /// Human-readable path, e.g. `/Notebook/Folder/Title`.
    pub h_path: String,
    pub markdown: String,
}

/// Raw asset bytes as the host returned them.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub bytes: Arc<[u8]>,
    /// Opaque change token (e.g. mtime). `None` disables hash caching.
    pub revision: Option<String>,
}

/// Placement and presentation metadata of a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocMeta {
    pub title: String,
    pub parent_id: String,
    pub sort_index: f64,
    pub sort_order: i64,
    pub icon: String,
}

impl DocMeta {
    /// Fallback used when no probe knows the document.
    pub fn minimal(h_path: &str) -> Self {
        let title = h_path
            .trim_end_matches('/')
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("Untitled")
            .to_string();
        DocMeta {
            title,
            ..Default::default()
        }
    }
}

// =============================================================================
// Metadata Probes
// =============================================================================

/// One strategy for recovering document metadata.
#[async_trait]
pub trait DocMetaProbe: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// `Ok(None)` means "this strategy does not know the document".
    async fn probe(&self, doc_id: &str) -> SyncResult<Option<DocMeta>>;
}

/// Ordered list of probe strategies.
#[derive(Clone, Default)]
pub struct ProbeChain {
    probes: Vec<Arc<dyn DocMetaProbe>>,
}

impl std::fmt::Debug for ProbeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.probes.iter().map(|p| p.name().to_string()))
            .finish()
    }
}

impl ProbeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a probe (builder style).
    pub fn with(mut self, probe: Arc<dyn DocMetaProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Runs the probes in order; the first `Some` wins.
    pub async fn resolve(&self, doc_id: &str, h_path: &str) -> DocMeta {
        for probe in &self.probes {
            match probe.probe(doc_id).await {
                Ok(Some(meta)) => {
                    debug!(doc_id, probe = probe.name(), "Metadata resolved");
                    return meta;
                }
                Ok(None) => {
                    debug!(doc_id, probe = probe.name(), "Probe has no metadata");
                }
                Err(e) => {
                    warn!(doc_id, probe = probe.name(), error = %e, "Metadata probe failed");
                }
            }
        }
        DocMeta::minimal(h_path)
    }
}

// =============================================================================
// Document Host
// =============================================================================

/// The editor side of a share.
#[async_trait]
pub trait DocumentHost: Send + Sync {
    async fn export_doc(&self, doc_id: &str) -> SyncResult<ExportedDoc>;

    /// Ids of every document in a notebook, parents before children.
    async fn list_notebook_docs(&self, notebook_id: &str) -> SyncResult<Vec<String>>;

    /// Bytes of an asset referenced as `path` in exported markdown.
    async fn fetch_asset(&self, path: &str) -> SyncResult<FetchedAsset>;

    fn metadata_probes(&self) -> ProbeChain;

    /// Display name of a notebook.
    async fn notebook_title(&self, notebook_id: &str) -> SyncResult<String> {
        Ok(notebook_id.to_string())
    }
}
