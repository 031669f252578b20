//! Native text tier: reads the embedded PDF text layer. Zero cost; only
//! succeeds when the document actually has a layer.

use std::ops::Range;

use acervo_protocol::{PageExtract, PipelineError, PipelineResult, PipelineTier};
use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::document::{DocumentFormat, DocumentRef};
use crate::tiers::TierExtractor;

/// Pages with less text than this score zero confidence: the layer is
/// scanner garbage, not content.
const MIN_PAGE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTextExtractor;

#[async_trait]
impl TierExtractor for NativeTextExtractor {
    fn tier(&self) -> PipelineTier {
        PipelineTier::NativeText
    }

    fn estimated_cost(&self, _pages: u32) -> f64 {
        0.0
    }

    async fn extract(
        &self,
        doc: &DocumentRef,
        pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>> {
        if doc.format != DocumentFormat::Pdf {
            return Err(PipelineError::permanent(
                self.tier(),
                "images have no text layer",
            ));
        }

        let mut out = Vec::new();
        for page in pages {
            cancel.check()?;
            let text = doc
                .text_layer
                .get(page as usize)
                .cloned()
                .unwrap_or_default();
            let confidence = if text.trim().len() >= MIN_PAGE_CHARS {
                1.0
            } else {
                0.0
            };
            out.push(PageExtract {
                page,
                text,
                tables: Vec::new(),
                confidence,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pdf_doc(text_layer: Vec<String>) -> DocumentRef {
        DocumentRef {
            path: PathBuf::from("doc.pdf"),
            format: DocumentFormat::Pdf,
            page_count: text_layer.len() as u32,
            text_layer,
        }
    }

    #[tokio::test]
    async fn test_pages_with_layer_have_full_confidence() {
        let doc = pdf_doc(vec!["x".repeat(100), "short".to_string()]);
        let extractor = NativeTextExtractor;
        let pages = extractor
            .extract(&doc, 0..2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].confidence, 1.0);
        assert_eq!(pages[1].confidence, 0.0);
    }

    #[tokio::test]
    async fn test_image_is_permanent_error() {
        let doc = DocumentRef {
            path: PathBuf::from("scan.png"),
            format: DocumentFormat::Image,
            page_count: 1,
            text_layer: vec![],
        };
        let err = NativeTextExtractor
            .extract(&doc, 0..1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.escalates());
    }

    #[tokio::test]
    async fn test_cancel_between_pages() {
        let doc = pdf_doc(vec!["x".repeat(100); 3]);
        let token = CancellationToken::new();
        token.cancel();
        let err = NativeTextExtractor
            .extract(&doc, 0..3, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
