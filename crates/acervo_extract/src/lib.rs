//! Document extraction: quality detection, tiered extractors and the
//! cost-aware cascade.
//!
//! The cascade walks tiers in cost-ascending order (native text, local OCR,
//! cloud OCR, vision AI), escalating whenever a tier's mean page confidence
//! falls short of its gate. Every page and tier boundary is a cancellation
//! checkpoint and a progress-emit point.

pub mod cancel;
pub mod cascade;
pub mod document;
pub mod engine;
pub mod merge;
pub mod metadata;
pub mod providers;
pub mod quality;
pub mod tiers;

pub use cancel::CancellationToken;
pub use cascade::{Cascade, ProgressSender};
pub use document::{DocumentFormat, DocumentRef};
pub use engine::{EnginePool, OcrEngine, OcrPage};
pub use providers::{AiClient, HttpAiClient, HttpOcrClient, OcrClient, StructuredExtraction};
pub use quality::{ProbeReport, QualityDetector};
pub use tiers::{
    CloudOcrExtractor, LocalOcrExtractor, NativeTextExtractor, TierExtractor, VisionExtractor,
};
