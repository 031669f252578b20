//! Vision AI tier: terminal variant. The multimodal model reads the
//! document directly and fills the services-table schema; its output is
//! surfaced as one synthetic tabular page so the merge step treats it like
//! any other tier that produced tables.

use std::ops::Range;
use std::sync::Arc;

use acervo_protocol::{PageExtract, PipelineError, PipelineResult, PipelineTier};
use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::document::DocumentRef;
use crate::providers::AiClient;
use crate::tiers::TierExtractor;

const COST_PER_PAGE: f64 = 3.0;

/// Confidence reported for structured model output; the tier is terminal,
/// so this value is informational and never gated.
const VISION_CONFIDENCE: f64 = 0.95;

pub struct VisionExtractor {
    client: Arc<dyn AiClient>,
}

impl VisionExtractor {
    pub fn new(client: Arc<dyn AiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TierExtractor for VisionExtractor {
    fn tier(&self) -> PipelineTier {
        PipelineTier::VisionAi
    }

    fn estimated_cost(&self, pages: u32) -> f64 {
        f64::from(pages) * COST_PER_PAGE
    }

    async fn extract(
        &self,
        doc: &DocumentRef,
        _pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>> {
        cancel.check()?;

        let extraction = self
            .client
            .extract_from_document(&doc.path)
            .await
            .map_err(terminalize)?;
        cancel.check()?;

        let rows: Vec<Vec<String>> = extraction
            .services
            .iter()
            .map(|svc| {
                vec![
                    svc.item_code.clone().unwrap_or_default(),
                    svc.description.clone(),
                    svc.quantity.map(|q| q.to_string()).unwrap_or_default(),
                    svc.unit.clone().unwrap_or_default(),
                ]
            })
            .collect();

        // metadata travels in the text channel so the merge step's
        // issuer/date scan can find it
        let mut text = String::new();
        if let Some(issuer) = &extraction.issuer {
            text.push_str(&format!("EMITENTE: {issuer}\n"));
        }
        if let Some(date) = &extraction.issue_date {
            text.push_str(&format!("DATA DE EMISSAO: {date}\n"));
        }

        Ok(vec![PageExtract {
            page: 0,
            text,
            tables: vec![rows],
            confidence: VISION_CONFIDENCE,
        }])
    }
}

/// Errors at the last tier fail the job instead of escalating.
fn terminalize(err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Cancelled => PipelineError::Cancelled,
        PipelineError::TransientExtractor { message, .. }
        | PipelineError::PermanentExtractor { message, .. } => PipelineError::terminal(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StructuredExtraction;
    use acervo_protocol::Service;
    use std::path::{Path, PathBuf};

    struct FixedAi {
        extraction: StructuredExtraction,
    }

    #[async_trait]
    impl AiClient for FixedAi {
        async fn extract_from_text(&self, _text: &str) -> PipelineResult<StructuredExtraction> {
            Ok(self.extraction.clone())
        }

        async fn extract_from_document(&self, _path: &Path) -> PipelineResult<StructuredExtraction> {
            Ok(self.extraction.clone())
        }
    }

    struct FailingAi;

    #[async_trait]
    impl AiClient for FailingAi {
        async fn extract_from_text(&self, _text: &str) -> PipelineResult<StructuredExtraction> {
            Err(PipelineError::transient(PipelineTier::VisionAi, "overloaded"))
        }

        async fn extract_from_document(&self, _path: &Path) -> PipelineResult<StructuredExtraction> {
            Err(PipelineError::transient(PipelineTier::VisionAi, "overloaded"))
        }
    }

    fn doc() -> DocumentRef {
        DocumentRef {
            path: PathBuf::from("scan.pdf"),
            format: crate::document::DocumentFormat::Pdf,
            page_count: 1,
            text_layer: vec![],
        }
    }

    #[tokio::test]
    async fn test_services_become_table_rows() {
        let ai = FixedAi {
            extraction: StructuredExtraction {
                services: vec![Service {
                    item_code: Some("1.1".to_string()),
                    description: "Pavimentação".to_string(),
                    quantity: Some(1200.0),
                    unit: Some("M2".to_string()),
                }],
                issuer: Some("Prefeitura".to_string()),
                issue_date: Some("10/05/2023".to_string()),
            },
        };
        let extractor = VisionExtractor::new(Arc::new(ai));
        let pages = extractor
            .extract(&doc(), 0..1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].tables[0][0][1], "Pavimentação");
        assert!(pages[0].text.contains("Prefeitura"));
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let extractor = VisionExtractor::new(Arc::new(FailingAi));
        let err = extractor
            .extract(&doc(), 0..1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TerminalExtractor { .. }));
        assert!(!err.escalates());
    }
}
