//! Shared domain types for the Acervo pipeline.
//!
//! Everything that crosses a crate boundary lives here: the extracted
//! service model, job lifecycle types, requirement/analysis shapes, the
//! error taxonomy and the flat pipeline configuration. The store, queue,
//! extractors and matcher all speak these types; none of them define their
//! own copies.

pub mod config;
pub mod defaults;
pub mod error;
pub mod types;

// Re-export the types used everywhere for convenience
pub use config::{load_config, ConfigError, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use types::{
    AnalysisId,
    AnalysisResult,
    Attestation,
    AttestationId,
    CandidateTrace,
    Contribution,
    Decision,
    DocumentQuality,
    ExtractionResult,
    Job,
    JobId,
    JobKind,
    JobProgress,
    JobResult,
    JobStatus,
    PageCost,
    PageExtract,
    PipelineTier,
    ProgressStage,
    RejectionReason,
    Requirement,
    RequirementResult,
    Service,
    UserId,
};
