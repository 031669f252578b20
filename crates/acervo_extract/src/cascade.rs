//! Cost-aware extraction cascade.
//!
//! Walks the tier chain cheapest-first, escalating on low confidence or
//! extractor failure, then merges page outputs into the normalized services
//! list. Stage boundaries emit progress and check cancellation.

use std::path::Path;
use std::sync::Arc;

use acervo_protocol::{
    defaults::MIN_CONFIDENCE_NATIVE, ExtractionResult, JobProgress, PageCost, PageExtract,
    PipelineConfig, PipelineError, PipelineResult, PipelineTier, ProgressStage,
};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::document::DocumentRef;
use crate::merge;
use crate::metadata;
use crate::providers::AiClient;
use crate::quality::{ProbeReport, QualityDetector};
use crate::tiers::{mean_confidence, TierExtractor};

/// Progress events flow to the queue through this channel; a dropped
/// receiver never stops the pipeline.
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<JobProgress>;

pub struct Cascade {
    detector: QualityDetector,
    extractors: Vec<Box<dyn TierExtractor>>,
    ai: Option<Arc<dyn AiClient>>,
    min_confidence_local: f64,
    min_confidence_cloud: f64,
    enable_cloud_ocr: bool,
    enable_vision: bool,
}

impl Cascade {
    pub fn new(
        config: &PipelineConfig,
        extractors: Vec<Box<dyn TierExtractor>>,
        ai: Option<Arc<dyn AiClient>>,
    ) -> Self {
        Self {
            detector: QualityDetector,
            extractors,
            ai,
            min_confidence_local: config.min_confidence_local,
            min_confidence_cloud: config.min_confidence_cloud,
            enable_cloud_ocr: config.enable_cloud_ocr,
            enable_vision: config.enable_vision,
        }
    }

    /// Run the cascade over one document.
    pub async fn process(
        &self,
        path: &Path,
        tier_hint: Option<PipelineTier>,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> PipelineResult<ExtractionResult> {
        let doc = DocumentRef::open(path)?;
        let report = ProbeReport::from_document(&doc);
        let (quality, quality_confidence) = self.detector.assess(&report);
        info!(
            path = %path.display(),
            ?quality,
            quality_confidence,
            pages = doc.page_count,
            "document probed"
        );

        let start = tier_hint
            .unwrap_or_else(|| quality.preferred_tier())
            .max(doc.floor_tier());
        let mut tier = self
            .first_available(start)
            .ok_or_else(|| PipelineError::terminal("no extraction tier available"))?;

        let total = doc.page_count;
        let mut page_costs: Vec<PageCost> = Vec::new();
        // best gate-failed output so far, kept in case escalation runs dry
        let mut best: Option<(f64, PipelineTier, Vec<PageExtract>)> = None;

        let (used_tier, pages) = loop {
            cancel.check()?;
            emit(progress, stage_for(tier), 0, total, tier);

            let extractor = self
                .extractor_for(tier)
                .expect("tier chosen from available set");

            match extractor.extract(&doc, 0..total, cancel).await {
                Ok(pages) => {
                    record_costs(&mut page_costs, extractor, total, &pages);
                    emit(progress, stage_for(tier), total, total, tier);

                    let confidence = mean_confidence(&pages);
                    let gate = self.gate_for(tier);
                    if confidence >= gate || tier.is_terminal() {
                        break (tier, pages);
                    }
                    info!(
                        %tier,
                        confidence,
                        gate,
                        "confidence below tier gate, escalating"
                    );
                    if best.as_ref().map_or(true, |(c, _, _)| confidence > *c) {
                        best = Some((confidence, tier, pages));
                    }
                    match self.next_available(tier) {
                        Some(next) => tier = next,
                        None => {
                            let (confidence, best_tier, pages) =
                                best.take().expect("at least the current tier was kept");
                            warn!(
                                tier = %best_tier,
                                confidence,
                                "no higher tier enabled, accepting best output"
                            );
                            break (best_tier, pages);
                        }
                    }
                }
                Err(err) if err.escalates() => match self.next_available(tier) {
                    Some(next) => {
                        warn!(%tier, %err, "tier failed, escalating");
                        tier = next;
                    }
                    None => {
                        return Err(PipelineError::terminal(format!(
                            "extraction failed at {tier} with no higher tier enabled: {err}"
                        )));
                    }
                },
                Err(err) => return Err(err),
            }
        };

        let raw_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        cancel.check()?;
        emit(progress, ProgressStage::Merge, 0, 1, used_tier);

        let mut issuer = None;
        let mut issue_date = None;
        let raw_services = if merge::has_tabular_data(&pages) {
            merge::services_from_tables(&pages)
        } else if let Some(ai) = &self.ai {
            emit(progress, ProgressStage::Ia, 0, 1, used_tier);
            cancel.check()?;
            match ai.extract_from_text(&raw_text).await {
                Ok(extraction) => {
                    issuer = extraction.issuer;
                    issue_date = extraction.issue_date;
                    extraction.services
                }
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) => {
                    warn!(%err, "structured pass failed, falling back to line heuristics");
                    merge::services_from_text(&raw_text)
                }
            }
        } else {
            merge::services_from_text(&raw_text)
        };
        emit(progress, ProgressStage::Merge, 1, 1, used_tier);

        cancel.check()?;
        emit(progress, ProgressStage::Final, 0, 1, used_tier);
        let services = merge::postprocess(raw_services, &raw_text);
        let issuer = issuer.or_else(|| metadata::extract_issuer(&raw_text));
        let issue_date = issue_date.or_else(|| metadata::extract_issue_date(&raw_text));
        emit(progress, ProgressStage::Final, 1, 1, used_tier);

        info!(
            pipeline = %used_tier,
            services = services.len(),
            cost = page_costs.iter().map(|c| c.cost).sum::<f64>(),
            "extraction finished"
        );

        Ok(ExtractionResult {
            services,
            issuer,
            issue_date,
            pipeline: used_tier,
            ocr_text: raw_text,
            page_costs,
        })
    }

    fn gate_for(&self, tier: PipelineTier) -> f64 {
        match tier {
            PipelineTier::NativeText => MIN_CONFIDENCE_NATIVE,
            PipelineTier::LocalOcr => self.min_confidence_local,
            PipelineTier::CloudOcr => self.min_confidence_cloud,
            // terminal: never gated
            PipelineTier::VisionAi => 0.0,
        }
    }

    fn enabled(&self, tier: PipelineTier) -> bool {
        match tier {
            PipelineTier::NativeText | PipelineTier::LocalOcr => true,
            PipelineTier::CloudOcr => self.enable_cloud_ocr,
            PipelineTier::VisionAi => self.enable_vision,
        }
    }

    fn extractor_for(&self, tier: PipelineTier) -> Option<&dyn TierExtractor> {
        self.extractors
            .iter()
            .find(|e| e.supports(tier))
            .map(|e| e.as_ref())
    }

    /// First usable tier at or above `start`.
    fn first_available(&self, start: PipelineTier) -> Option<PipelineTier> {
        let mut tier = Some(start);
        while let Some(current) = tier {
            if self.enabled(current) && self.extractor_for(current).is_some() {
                return Some(current);
            }
            tier = current.next();
        }
        None
    }

    /// Next usable tier strictly above `current`.
    fn next_available(&self, current: PipelineTier) -> Option<PipelineTier> {
        current.next().and_then(|next| self.first_available(next))
    }
}

fn stage_for(tier: PipelineTier) -> ProgressStage {
    match tier {
        PipelineTier::NativeText => ProgressStage::Texto,
        PipelineTier::LocalOcr | PipelineTier::CloudOcr => ProgressStage::Ocr,
        PipelineTier::VisionAi => ProgressStage::Vision,
    }
}

fn emit(
    progress: &ProgressSender,
    stage: ProgressStage,
    current: u32,
    total: u32,
    tier: PipelineTier,
) {
    let _ = progress.send(JobProgress {
        current,
        total,
        stage: Some(stage),
        message: None,
        pipeline: Some(tier),
    });
}

fn record_costs(
    page_costs: &mut Vec<PageCost>,
    extractor: &dyn TierExtractor,
    total: u32,
    pages: &[PageExtract],
) {
    if pages.is_empty() {
        return;
    }
    let per_page = extractor.estimated_cost(total) / pages.len() as f64;
    for page in pages {
        page_costs.push(PageCost {
            page: page.page,
            tier: extractor.tier(),
            cost: per_page,
        });
    }
}
