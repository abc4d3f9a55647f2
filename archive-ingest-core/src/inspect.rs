//! Document inspection: validity and page count, without failing the batch.
//!
//! [`Inspector::inspect`] never returns an error. Every problem (missing file,
//! unsupported extension, corrupt PDF, zero pages) becomes an [`InspectionResult`]
//! with `valid = false` and a descriptive [`InspectionError`].
//!
//! Parsing goes through the [`DocumentBackend`] capability interface and runs on
//! tokio's blocking pool. The opened document is wrapped in a guard that calls
//! [`OpenDocument::close`] when it goes out of scope, so it is released before
//! `inspect` returns on success and failure paths alike.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::contract::{
    content_type_for, DocumentBackend, InspectionResult, OpenDocument, SourceItem,
};
use crate::error::InspectionError;

/// Image master formats kept in the archive alongside PDFs.
pub const DEFAULT_PASSTHROUGH_EXTENSIONS: &[&str] =
    &["tif", "tiff", "jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// Which extensions are parsed and which are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectorConfig {
    /// Parsed through the document backend.
    pub document_extensions: Vec<String>,
    /// Accepted without parsing; hashed but no page count.
    pub passthrough_extensions: Vec<String>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            document_extensions: vec!["pdf".to_string()],
            passthrough_extensions: DEFAULT_PASSTHROUGH_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl InspectorConfig {
    fn matches(list: &[String], ext: &str) -> bool {
        list.iter()
            .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

#[derive(Clone)]
pub struct Inspector {
    backend: Arc<dyn DocumentBackend>,
    config: InspectorConfig,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector").field("config", &self.config).finish()
    }
}

impl Inspector {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: InspectorConfig) -> Self {
        Self { backend, config }
    }

    /// Inspector backed by [`PdfBackend`].
    pub fn pdf(config: InspectorConfig) -> Self {
        Self::new(Arc::new(PdfBackend), config)
    }

    pub async fn inspect(&self, item: &SourceItem) -> InspectionResult {
        let ext = item
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let content_type = content_type_for(&item.path).to_string();
        let path = item.path.clone();

        let outcome = if InspectorConfig::matches(&self.config.document_extensions, &ext) {
            let backend = Arc::clone(&self.backend);
            run_blocking(&item.path, move || inspect_document(backend.as_ref(), &path)).await
        } else if InspectorConfig::matches(&self.config.passthrough_extensions, &ext) {
            run_blocking(&item.path, move || hash_file(&path).map(|sha| (None, Some(sha)))).await
        } else {
            Err(InspectionError::UnsupportedFormat {
                path: item.path.clone(),
                extension: ext,
            })
        };

        match outcome {
            Ok((page_count, sha256)) => {
                info!(path = %item.path.display(), ?page_count, "[INSPECT] Document accepted");
                InspectionResult {
                    item: item.clone(),
                    page_count,
                    valid: true,
                    error: None,
                    content_type,
                    sha256,
                }
            }
            Err(e) => {
                warn!(path = %item.path.display(), error = %e, "[INSPECT] Document rejected");
                InspectionResult::invalid(item.clone(), e)
            }
        }
    }
}

type Inspected = (Option<u32>, Option<String>);

async fn run_blocking<F>(path: &Path, work: F) -> Result<Inspected, InspectionError>
where
    F: FnOnce() -> Result<Inspected, InspectionError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => Err(InspectionError::Task {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Closes the wrapped document when dropped.
struct DocumentGuard(Option<Box<dyn OpenDocument>>);

impl DocumentGuard {
    fn page_count(&self) -> Result<u32, InspectionError> {
        self.0.as_ref().map_or(Ok(0), |doc| doc.page_count())
    }

    fn sha256(&self) -> Option<String> {
        self.0.as_ref().and_then(|doc| doc.sha256())
    }
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        if let Some(doc) = self.0.take() {
            doc.close();
        }
    }
}

fn inspect_document(
    backend: &dyn DocumentBackend,
    path: &Path,
) -> Result<Inspected, InspectionError> {
    let guard = DocumentGuard(Some(backend.open(path)?));
    let pages = guard.page_count()?;
    if pages == 0 {
        return Err(InspectionError::Empty {
            path: path.to_path_buf(),
        });
    }
    let sha256 = guard.sha256();
    debug!(path = %path.display(), pages, "[INSPECT] Counted pages");
    Ok((Some(pages), sha256))
}

fn unreadable(path: &Path, e: std::io::Error) -> InspectionError {
    InspectionError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn hash_file(path: &Path) -> Result<String, InspectionError> {
    let mut file = File::open(path).map_err(|e| unreadable(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| unreadable(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// [`DocumentBackend`] for PDF files, built on `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfBackend;

struct PdfDocument {
    doc: lopdf::Document,
    sha256: String,
}

impl DocumentBackend for PdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn OpenDocument>, InspectionError> {
        let bytes = std::fs::read(path).map_err(|e| unreadable(path, e))?;
        if !bytes.starts_with(b"%PDF-") {
            return Err(InspectionError::Corrupt {
                path: path.to_path_buf(),
                message: "missing %PDF- header".to_string(),
            });
        }
        let doc = lopdf::Document::load_mem(&bytes).map_err(|e| InspectionError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        Ok(Box::new(PdfDocument { doc, sha256 }))
    }
}

impl OpenDocument for PdfDocument {
    fn page_count(&self) -> Result<u32, InspectionError> {
        Ok(self.doc.get_pages().len() as u32)
    }

    fn sha256(&self) -> Option<String> {
        Some(self.sha256.clone())
    }

    fn close(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        closed: Arc<AtomicUsize>,
        pages: Result<u32, InspectionError>,
    }

    struct CountingDoc {
        closed: Arc<AtomicUsize>,
        pages: Result<u32, InspectionError>,
    }

    impl DocumentBackend for CountingBackend {
        fn open(&self, _path: &Path) -> Result<Box<dyn OpenDocument>, InspectionError> {
            Ok(Box::new(CountingDoc {
                closed: Arc::clone(&self.closed),
                pages: self.pages.clone(),
            }))
        }
    }

    impl OpenDocument for CountingDoc {
        fn page_count(&self) -> Result<u32, InspectionError> {
            self.pages.clone()
        }

        fn close(self: Box<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn document_is_closed_on_success_and_error() {
        let closed = Arc::new(AtomicUsize::new(0));
        let ok = CountingBackend {
            closed: Arc::clone(&closed),
            pages: Ok(3),
        };
        assert_eq!(inspect_document(&ok, Path::new("a.pdf")).unwrap().0, Some(3));

        let broken = CountingBackend {
            closed: Arc::clone(&closed),
            pages: Err(InspectionError::Corrupt {
                path: "b.pdf".into(),
                message: "bad xref".into(),
            }),
        };
        assert!(inspect_document(&broken, Path::new("b.pdf")).is_err());

        let empty = CountingBackend {
            closed: Arc::clone(&closed),
            pages: Ok(0),
        };
        assert!(matches!(
            inspect_document(&empty, Path::new("c.pdf")),
            Err(InspectionError::Empty { .. })
        ));

        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn extension_matching_ignores_case_and_dots() {
        let list = vec![".TIF".to_string(), "pdf".to_string()];
        assert!(InspectorConfig::matches(&list, "tif"));
        assert!(InspectorConfig::matches(&list, "PDF"));
        assert!(!InspectorConfig::matches(&list, "docx"));
    }
}
