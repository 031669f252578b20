//! Cloud OCR tier: delegates to a remote recognition service. Transient
//! failures are retried inside the client with exponential backoff.

use std::ops::Range;
use std::sync::Arc;

use acervo_protocol::{PageExtract, PipelineResult, PipelineTier};
use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::document::DocumentRef;
use crate::providers::OcrClient;
use crate::tiers::TierExtractor;

const COST_PER_PAGE: f64 = 1.0;

pub struct CloudOcrExtractor {
    client: Arc<dyn OcrClient>,
}

impl CloudOcrExtractor {
    pub fn new(client: Arc<dyn OcrClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TierExtractor for CloudOcrExtractor {
    fn tier(&self) -> PipelineTier {
        PipelineTier::CloudOcr
    }

    fn estimated_cost(&self, pages: u32) -> f64 {
        f64::from(pages) * COST_PER_PAGE
    }

    async fn extract(
        &self,
        doc: &DocumentRef,
        pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>> {
        // external call boundary is a cancellation checkpoint
        cancel.check()?;

        let mut out = self.client.recognize(&doc.path).await?;
        out.retain(|p| pages.contains(&p.page));
        cancel.check()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acervo_protocol::PipelineError;
    use std::path::{Path, PathBuf};

    struct FixedClient {
        pages: Vec<PageExtract>,
    }

    #[async_trait]
    impl OcrClient for FixedClient {
        async fn recognize(&self, _path: &Path) -> PipelineResult<Vec<PageExtract>> {
            Ok(self.pages.clone())
        }
    }

    fn doc() -> DocumentRef {
        DocumentRef {
            path: PathBuf::from("scan.pdf"),
            format: crate::document::DocumentFormat::Pdf,
            page_count: 3,
            text_layer: vec![],
        }
    }

    #[tokio::test]
    async fn test_filters_to_requested_range() {
        let client = FixedClient {
            pages: (0..3)
                .map(|page| PageExtract {
                    page,
                    text: format!("pagina {page}"),
                    tables: vec![],
                    confidence: 0.9,
                })
                .collect(),
        };
        let extractor = CloudOcrExtractor::new(Arc::new(client));
        let pages = extractor
            .extract(&doc(), 0..2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_call() {
        let client = FixedClient { pages: vec![] };
        let extractor = CloudOcrExtractor::new(Arc::new(client));
        let token = CancellationToken::new();
        token.cancel();
        let err = extractor.extract(&doc(), 0..1, &token).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
