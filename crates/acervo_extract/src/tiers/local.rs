//! Local OCR tier.
//!
//! Image inputs are preprocessed (deskew, contrast stretch, denoise) and
//! recognized by an engine leased from the process-wide pool. When the
//! primary engine reports low confidence on a page, the secondary engine
//! takes a second pass and the better result wins. PDF inputs escalate:
//! this tier has no rasterizer.

use std::ops::Range;

use acervo_protocol::{PageExtract, PipelineError, PipelineResult, PipelineTier};
use async_trait::async_trait;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::document::{DocumentFormat, DocumentRef};
use crate::engine::{EnginePool, OcrEngine, OcrPage};
use crate::tiers::TierExtractor;

const COST_PER_PAGE: f64 = 0.1;

pub struct LocalOcrExtractor<E: OcrEngine> {
    primary: EnginePool<E>,
    secondary: Option<EnginePool<E>>,
    /// Below this page confidence the secondary engine gets a try.
    fallback_threshold: f64,
    preprocess: bool,
}

impl<E: OcrEngine> LocalOcrExtractor<E> {
    pub fn new(
        primary: EnginePool<E>,
        secondary: Option<EnginePool<E>>,
        fallback_threshold: f64,
        preprocess: bool,
    ) -> Self {
        Self {
            primary,
            secondary,
            fallback_threshold,
            preprocess,
        }
    }

    async fn recognize_with_pool(
        &self,
        pool: &EnginePool<E>,
        image: std::path::PathBuf,
    ) -> PipelineResult<OcrPage> {
        let lease = pool.lease().await?;
        let (_lease, result) = lease.recognize(image).await;
        result
    }

    fn prepared_input(&self, doc: &DocumentRef) -> PipelineResult<std::path::PathBuf> {
        #[cfg(feature = "ocr")]
        if self.preprocess {
            return crate::tiers::preprocess::preprocess_image(&doc.path);
        }
        let _ = self.preprocess;
        Ok(doc.path.clone())
    }
}

#[async_trait]
impl<E: OcrEngine> TierExtractor for LocalOcrExtractor<E> {
    fn tier(&self) -> PipelineTier {
        PipelineTier::LocalOcr
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
        if doc.format != DocumentFormat::Image {
            return Err(PipelineError::permanent(
                self.tier(),
                "local OCR handles image inputs only",
            ));
        }

        let input = self.prepared_input(doc)?;

        let mut out = Vec::new();
        for page in pages {
            cancel.check()?;

            let mut result = self
                .recognize_with_pool(&self.primary, input.clone())
                .await?;
            if result.confidence < self.fallback_threshold {
                if let Some(secondary) = &self.secondary {
                    cancel.check()?;
                    debug!(
                        page,
                        confidence = result.confidence,
                        "primary below threshold, trying secondary engine"
                    );
                    if let Ok(second) = self.recognize_with_pool(secondary, input.clone()).await {
                        if second.confidence > result.confidence {
                            result = second;
                        }
                    }
                }
            }

            out.push(PageExtract {
                page,
                text: result.text,
                tables: Vec::new(),
                confidence: result.confidence,
            });
        }
        Ok(out)
    }
}
