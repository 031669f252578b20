//! Document probing.
//!
//! Opening a document reads its embedded text layer once (for PDFs); the
//! quality detector and the native tier both work from that single read.

use std::path::{Path, PathBuf};

use acervo_protocol::{PipelineError, PipelineResult, PipelineTier};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image,
}

/// A probed input document.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub format: DocumentFormat,
    /// Page count; 1 for images, text-layer page count for PDFs.
    pub page_count: u32,
    /// Embedded text per page. Empty strings for pages without a layer;
    /// empty vec for images.
    pub text_layer: Vec<String>,
}

impl DocumentRef {
    /// Probe a file on disk. The PDF text layer is extracted here (it is
    /// cheap relative to any OCR) so later stages never re-read it.
    pub fn open(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::validation(format!(
                "file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Self::open_pdf(path),
            "png" | "jpg" | "jpeg" | "webp" => Ok(Self {
                path: path.to_path_buf(),
                format: DocumentFormat::Image,
                page_count: 1,
                text_layer: Vec::new(),
            }),
            other => Err(PipelineError::validation(format!(
                "unsupported file type: .{other}"
            ))),
        }
    }

    fn open_pdf(path: &Path) -> PipelineResult<Self> {
        // A PDF without a readable text layer is still processable by the
        // OCR tiers, so extraction failures degrade to an empty layer.
        let text_layer = match pdf_extract::extract_text_by_pages(path) {
            Ok(pages) => pages,
            Err(err) => {
                debug!(path = %path.display(), %err, "no usable text layer");
                Vec::new()
            }
        };
        let page_count = text_layer.len().max(1) as u32;
        Ok(Self {
            path: path.to_path_buf(),
            format: DocumentFormat::Pdf,
            page_count,
            text_layer,
        })
    }

    /// Fraction of pages carrying a meaningful amount of selectable text.
    pub fn text_ratio(&self) -> f64 {
        if self.format == DocumentFormat::Image || self.page_count == 0 {
            return 0.0;
        }
        let pages_with_text = self
            .text_layer
            .iter()
            .filter(|t| t.trim().len() >= MIN_TEXT_LAYER_CHARS)
            .count();
        pages_with_text as f64 / self.page_count as f64
    }

    /// Cheapest tier this document can start at: images have no text layer
    /// to read natively.
    pub fn floor_tier(&self) -> PipelineTier {
        match self.format {
            DocumentFormat::Pdf => PipelineTier::NativeText,
            DocumentFormat::Image => PipelineTier::LocalOcr,
        }
    }
}

/// Pages with fewer characters than this are treated as having no layer
/// (scanner noise, page numbers).
const MIN_TEXT_LAYER_CHARS: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_validation_error() {
        let err = DocumentRef::open(Path::new("/nonexistent/file.pdf")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_unsupported_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let err = DocumentRef::open(&path).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_image_probe() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.png");
        std::fs::write(&path, b"\x89PNG\r\n").unwrap();
        let doc = DocumentRef::open(&path).unwrap();
        assert_eq!(doc.format, DocumentFormat::Image);
        assert_eq!(doc.page_count, 1);
        assert_eq!(doc.text_ratio(), 0.0);
        assert_eq!(doc.floor_tier(), PipelineTier::LocalOcr);
    }

    #[test]
    fn test_text_ratio() {
        let doc = DocumentRef {
            path: PathBuf::from("doc.pdf"),
            format: DocumentFormat::Pdf,
            page_count: 4,
            text_layer: vec![
                "x".repeat(200),
                "x".repeat(200),
                "3".to_string(),
                String::new(),
            ],
        };
        assert!((doc.text_ratio() - 0.5).abs() < 1e-9);
    }
}
