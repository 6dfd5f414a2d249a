//! Filesystem document host.
//!
//! A directory is a notebook and every `*.md` file below it is a document.
//! Assets are resolved relative to the directory, so `![](assets/a.png)`
//! reads `<dir>/assets/a.png`.
//!
//! A document may start with a front-matter block:
//!
//! ```text
//! ---
//! id: 20240101-intro
//! title: Introduction
//! icon: 📘
//! sort: 3
//! ---
//! ```
//!
//! Without an `id:` line the id is derived from the file stem. A file
//! `guide.md` next to a folder `guide/` is the parent of the documents in
//! that folder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tracing::debug;

use docshare_core::validation::MAX_ID_LEN;
use docshare_sync::host::{DocMeta, DocMetaProbe, DocumentHost, ExportedDoc, FetchedAsset, ProbeChain};
use docshare_sync::{SyncError, SyncResult};

// =============================================================================
// Front Matter
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FrontMatter {
    id: Option<String>,
    title: Option<String>,
    icon: Option<String>,
    sort: Option<i64>,
}

/// Splits a leading `---` block from the body. Text without one is all body.
fn split_front_matter(text: &str) -> (FrontMatter, &str) {
    let mut front = FrontMatter::default();

    let rest = match text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) {
        Some(rest) => rest,
        None => return (front, text),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let line = line.trim();
        if line == "---" {
            return (front, &rest[offset..]);
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "id" => front.id = Some(value),
            "title" => front.title = Some(value),
            "icon" => front.icon = Some(value),
            "sort" => front.sort = value.parse().ok(),
            _ => {}
        }
    }

    // unterminated block
    (FrontMatter::default(), text)
}

/// Id-safe form of a file stem.
fn id_from_stem(stem: &str) -> String {
    let mut id: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    id.truncate(MAX_ID_LEN);
    let trimmed = id.trim_matches('-');
    if trimmed.is_empty() {
        "doc".to_string()
    } else {
        trimmed.to_string()
    }
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

fn host_err(path: &Path, e: std::io::Error) -> SyncError {
    SyncError::Host(format!("{}: {}", path.display(), e))
}

// =============================================================================
// Index
// =============================================================================

#[derive(Debug, Clone)]
struct FsDoc {
    id: String,
    path: PathBuf,
    h_path: String,
    parent_id: String,
    position: usize,
    front: FrontMatter,
    heading: Option<String>,
}

impl FsDoc {
    fn meta(&self, title: String) -> DocMeta {
        DocMeta {
            title,
            parent_id: self.parent_id.clone(),
            sort_index: self.position as f64,
            sort_order: self.front.sort.unwrap_or(self.position as i64),
            icon: self.front.icon.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
struct DocIndex {
    docs: Vec<FsDoc>,
    by_id: HashMap<String, usize>,
}

impl DocIndex {
    fn get(&self, id: &str) -> Option<&FsDoc> {
        self.by_id.get(id).map(|&i| &self.docs[i])
    }
}

// =============================================================================
// Host
// =============================================================================

pub struct FsHost {
    root: PathBuf,
    notebook_id: String,
    notebook_title: String,
    index: Arc<DocIndex>,
}

impl FsHost {
    /// Scans `dir` for markdown documents.
    pub async fn open(dir: &Path) -> SyncResult<Self> {
        let root = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| host_err(dir, e))?;
        let notebook_title = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "notebook".to_string());
        let notebook_id = id_from_stem(&notebook_title);

        let files = markdown_files(&root).await?;
        let mut index = DocIndex::default();
        let mut ids_by_rel: HashMap<String, String> = HashMap::new();
        let mut pending_parents = Vec::with_capacity(files.len());

        for (position, path) in files.into_iter().enumerate() {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| host_err(&path, e))?;
            let (front, body) = split_front_matter(&text);
            let heading = first_heading(body);

            let rel = path
                .strip_prefix(&root)
                .unwrap_or(path.as_path())
                .with_extension("")
                .to_string_lossy()
                .replace('\\', "/");
            let stem = rel.rsplit('/').next().unwrap_or(rel.as_str()).to_string();

            let base_id = front
                .id
                .as_deref()
                .map(id_from_stem)
                .unwrap_or_else(|| id_from_stem(&stem));
            let mut id = base_id.clone();
            let mut n = 2;
            while index.by_id.contains_key(&id) {
                id = format!("{base_id}-{n}");
                n += 1;
            }

            let parent_rel = rel.rsplit_once('/').map(|(parent, _)| parent.to_string());
            ids_by_rel.insert(rel.clone(), id.clone());
            pending_parents.push(parent_rel);

            index.by_id.insert(id.clone(), index.docs.len());
            index.docs.push(FsDoc {
                id,
                path,
                h_path: format!("/{}/{}", notebook_title, rel),
                parent_id: String::new(),
                position,
                front,
                heading,
            });
        }

        for (doc, parent_rel) in index.docs.iter_mut().zip(pending_parents) {
            if let Some(parent_id) = parent_rel.and_then(|p| ids_by_rel.get(&p)) {
                doc.parent_id = parent_id.clone();
            }
        }

        debug!(root = %root.display(), docs = index.docs.len(), "Scanned notebook directory");
        Ok(FsHost {
            root,
            notebook_id,
            notebook_title,
            index: Arc::new(index),
        })
    }

    /// Host with no documents, for commands that only manage shares.
    pub fn detached() -> Self {
        FsHost {
            root: PathBuf::from("."),
            notebook_id: String::new(),
            notebook_title: String::new(),
            index: Arc::new(DocIndex::default()),
        }
    }

    pub fn notebook_id(&self) -> &str {
        &self.notebook_id
    }

    pub fn doc_ids(&self) -> Vec<String> {
        self.index.docs.iter().map(|d| d.id.clone()).collect()
    }

    fn doc(&self, doc_id: &str) -> SyncResult<&FsDoc> {
        self.index
            .get(doc_id)
            .ok_or_else(|| SyncError::Host(format!("Unknown document: {doc_id}")))
    }
}

/// Every `*.md` file below `root`, sorted by path. Hidden entries and the
/// `assets` directory are skipped.
async fn markdown_files(root: &Path) -> SyncResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| host_err(&dir, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| host_err(&dir, e))? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| host_err(&path, e))?;
            if file_type.is_dir() {
                if dir != root || name != "assets" {
                    stack.push(path);
                }
            } else if file_type.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
            {
                files.push(path);
            }
        }
    }

    // string order puts `guide.md` before `guide/intro.md`
    files.sort_by_key(|p| p.to_string_lossy().into_owned());
    Ok(files)
}

#[async_trait]
impl DocumentHost for FsHost {
    async fn export_doc(&self, doc_id: &str) -> SyncResult<ExportedDoc> {
        let doc = self.doc(doc_id)?;
        let text = tokio::fs::read_to_string(&doc.path)
            .await
            .map_err(|e| host_err(&doc.path, e))?;
        let (_, body) = split_front_matter(&text);
        Ok(ExportedDoc {
            h_path: doc.h_path.clone(),
            markdown: body.to_string(),
        })
    }

    async fn list_notebook_docs(&self, notebook_id: &str) -> SyncResult<Vec<String>> {
        if notebook_id != self.notebook_id {
            return Err(SyncError::Host(format!("Unknown notebook: {notebook_id}")));
        }
        Ok(self.doc_ids())
    }

    async fn fetch_asset(&self, path: &str) -> SyncResult<FetchedAsset> {
        let full = self.root.join(path);
        let metadata = tokio::fs::metadata(&full)
            .await
            .map_err(|e| host_err(&full, e))?;
        let bytes = tokio::fs::read(&full).await.map_err(|e| host_err(&full, e))?;

        let revision = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| format!("{}-{}", d.as_nanos(), metadata.len()));

        Ok(FetchedAsset {
            bytes: bytes.into(),
            revision,
        })
    }

    fn metadata_probes(&self) -> ProbeChain {
        ProbeChain::new()
            .with(Arc::new(FrontMatterProbe(self.index.clone())))
            .with(Arc::new(HeadingProbe(self.index.clone())))
    }

    async fn notebook_title(&self, _notebook_id: &str) -> SyncResult<String> {
        Ok(self.notebook_title.clone())
    }
}

// =============================================================================
// Metadata Probes
// =============================================================================

/// `title:` from the front-matter block.
struct FrontMatterProbe(Arc<DocIndex>);

#[async_trait]
impl DocMetaProbe for FrontMatterProbe {
    fn name(&self) -> &str {
        "front-matter"
    }

    async fn probe(&self, doc_id: &str) -> SyncResult<Option<DocMeta>> {
        Ok(self
            .0
            .get(doc_id)
            .and_then(|doc| doc.front.title.clone().map(|title| doc.meta(title))))
    }
}

/// First `# ` heading of the body.
struct HeadingProbe(Arc<DocIndex>);

#[async_trait]
impl DocMetaProbe for HeadingProbe {
    fn name(&self) -> &str {
        "heading"
    }

    async fn probe(&self, doc_id: &str) -> SyncResult<Option<DocMeta>> {
        Ok(self
            .0
            .get(doc_id)
            .and_then(|doc| doc.heading.clone().map(|title| doc.meta(title))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_front_matter_split() {
        let (front, body) = split_front_matter("---\nid: abc\ntitle: \"Hello\"\nsort: 4\n---\n# Body\n");
        assert_eq!(front.id.as_deref(), Some("abc"));
        assert_eq!(front.title.as_deref(), Some("Hello"));
        assert_eq!(front.sort, Some(4));
        assert_eq!(body, "# Body\n");

        let (front, body) = split_front_matter("# No front matter");
        assert_eq!(front, FrontMatter::default());
        assert_eq!(body, "# No front matter");

        let (front, body) = split_front_matter("---\nid: x\nnever closed");
        assert_eq!(front, FrontMatter::default());
        assert!(body.starts_with("---"));
    }

    #[test]
    fn test_id_from_stem() {
        assert_eq!(id_from_stem("Weekly Notes"), "Weekly-Notes");
        assert_eq!(id_from_stem("日本"), "doc");
        assert_eq!(id_from_stem(&"a".repeat(100)).len(), MAX_ID_LEN);
    }

    #[tokio::test]
    async fn test_scan_builds_paths_and_parents() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nb");
        write(&root, "guide.md", "# Guide\n");
        write(&root, "guide/intro.md", "---\nid: intro-1\ntitle: Intro\n---\nbody");
        write(&root, ".hidden.md", "skip");
        write(&root, "assets/readme.md", "skip");
        write(&root, "notes.txt", "skip");

        let host = FsHost::open(&root).await.unwrap();
        assert_eq!(host.notebook_id(), "nb");
        assert_eq!(host.doc_ids(), vec!["guide".to_string(), "intro-1".to_string()]);

        let intro = host.index.get("intro-1").unwrap();
        assert_eq!(intro.h_path, "/nb/guide/intro");
        assert_eq!(intro.parent_id, "guide");

        let exported = host.export_doc("intro-1").await.unwrap();
        assert_eq!(exported.markdown, "body");
        assert!(host.export_doc("missing").await.is_err());
        assert!(host.list_notebook_docs("other").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_suffixed() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a/page.md", "one");
        write(tmp.path(), "b/page.md", "two");

        let host = FsHost::open(tmp.path()).await.unwrap();
        assert_eq!(host.doc_ids(), vec!["page".to_string(), "page-2".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "---\ntitle: From Front\nicon: x\n---\n# From Heading");
        write(tmp.path(), "b.md", "text\n# From Heading\n");
        write(tmp.path(), "c.md", "no heading");

        let host = FsHost::open(tmp.path()).await.unwrap();
        let probes = host.metadata_probes();

        let a = probes.resolve("a", "/nb/a").await;
        assert_eq!(a.title, "From Front");
        assert_eq!(a.icon, "x");
        assert_eq!(probes.resolve("b", "/nb/b").await.title, "From Heading");
        assert_eq!(probes.resolve("c", "/nb/c").await.title, "c");
    }

    #[tokio::test]
    async fn test_fetch_asset_with_revision() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "assets/a.bin", "12345");

        let host = FsHost::open(tmp.path()).await.unwrap();
        let asset = host.fetch_asset("assets/a.bin").await.unwrap();
        assert_eq!(&*asset.bytes, b"12345");
        assert!(asset.revision.unwrap().ends_with("-5"));

        assert!(host.fetch_asset("assets/none.bin").await.is_err());
    }
}
