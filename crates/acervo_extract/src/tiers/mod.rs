//! Tier extractor adapters.
//!
//! All four tiers implement the same contract; the cascade only ever talks
//! to `TierExtractor`. The vision adapter is the terminal variant: it never
//! escalates, its failure fails the job.

mod cloud;
mod local;
mod native;
#[cfg(feature = "ocr")]
pub mod preprocess;
mod vision;

pub use cloud::CloudOcrExtractor;
pub use local::LocalOcrExtractor;
pub use native::NativeTextExtractor;
pub use vision::VisionExtractor;

use std::ops::Range;

use acervo_protocol::{PageExtract, PipelineResult, PipelineTier};
use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::document::DocumentRef;

/// One extraction tier. Implementations must be cancellable at page
/// boundaries.
#[async_trait]
pub trait TierExtractor: Send + Sync {
    fn tier(&self) -> PipelineTier;

    fn supports(&self, tier: PipelineTier) -> bool {
        tier == self.tier()
    }

    /// Abstract cost units for processing `pages` pages at this tier.
    fn estimated_cost(&self, pages: u32) -> f64;

    async fn extract(
        &self,
        doc: &DocumentRef,
        pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>>;
}

/// Mean confidence over a tier's page outputs; empty output scores zero.
pub fn mean_confidence(pages: &[PageExtract]) -> f64 {
    if pages.is_empty() {
        return 0.0;
    }
    pages.iter().map(|p| p.confidence).sum::<f64>() / pages.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_confidence() {
        assert_eq!(mean_confidence(&[]), 0.0);
        let pages = vec![
            PageExtract {
                confidence: 1.0,
                ..Default::default()
            },
            PageExtract {
                confidence: 0.5,
                ..Default::default()
            },
        ];
        assert!((mean_confidence(&pages) - 0.75).abs() < 1e-9);
    }
}
