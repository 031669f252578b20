//! Core domain model: services, jobs, requirements, analysis results.
//!
//! All enums serialize as snake_case strings; status enums additionally
//! expose `as_str`/`parse` with SCREAMING_SNAKE_CASE tokens because that is
//! what the store persists.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map($name::new)
                    .map_err(|_| IdParseError(s.to_string()))
            }
        }
    };
}

id_newtype!(
    /// Row id of a processing job.
    JobId
);
id_newtype!(
    /// Row id of a user account.
    UserId
);
id_newtype!(
    /// Row id of an attestation.
    AttestationId
);
id_newtype!(
    /// Row id of a tender analysis.
    AnalysisId
);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid id: {0}")]
pub struct IdParseError(String);

// ============================================================================
// Services & attestations
// ============================================================================

/// One extracted line of work: the atomic unit the pipeline produces and the
/// matcher consumes.
///
/// `quantity` and `unit` are optional only while a document is mid-extraction;
/// a completed job never stores a service without both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_code: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Service {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            item_code: None,
            description: description.into(),
            quantity: None,
            unit: None,
        }
    }

    /// True when the service may enter a completed job's services list.
    pub fn is_complete(&self) -> bool {
        matches!(self.quantity, Some(q) if q > 0.0)
            && self.unit.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// A certificate of technical capability: issuer metadata plus the ordered
/// services extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub id: AttestationId,
    pub user_id: UserId,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    pub file_path: String,
    #[serde(default)]
    pub ocr_text: String,
    pub services: Vec<Service>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Pipeline tiers & quality
// ============================================================================

/// Extraction tier, ordered by cost. `next()` walks the escalation chain;
/// vision is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineTier {
    NativeText,
    LocalOcr,
    CloudOcr,
    VisionAi,
}

impl PipelineTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineTier::NativeText => "NATIVE_TEXT",
            PipelineTier::LocalOcr => "LOCAL_OCR",
            PipelineTier::CloudOcr => "CLOUD_OCR",
            PipelineTier::VisionAi => "VISION_AI",
        }
    }

    /// Next tier in cost-ascending order, or None for the terminal tier.
    pub fn next(self) -> Option<PipelineTier> {
        match self {
            PipelineTier::NativeText => Some(PipelineTier::LocalOcr),
            PipelineTier::LocalOcr => Some(PipelineTier::CloudOcr),
            PipelineTier::CloudOcr => Some(PipelineTier::VisionAi),
            PipelineTier::VisionAi => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl FromStr for PipelineTier {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NATIVE_TEXT" => Ok(PipelineTier::NativeText),
            "LOCAL_OCR" => Ok(PipelineTier::LocalOcr),
            "CLOUD_OCR" => Ok(PipelineTier::CloudOcr),
            "VISION_AI" => Ok(PipelineTier::VisionAi),
            other => Err(EnumParseError::new("PipelineTier", other)),
        }
    }
}

impl fmt::Display for PipelineTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty tier assigned by the quality detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentQuality {
    Native,
    Easy,
    Medium,
    Hard,
    VeryHard,
}

impl DocumentQuality {
    /// Preferred starting tier for each difficulty class.
    pub fn preferred_tier(self) -> PipelineTier {
        match self {
            DocumentQuality::Native => PipelineTier::NativeText,
            DocumentQuality::Easy | DocumentQuality::Medium => PipelineTier::LocalOcr,
            DocumentQuality::Hard => PipelineTier::CloudOcr,
            DocumentQuality::VeryHard => PipelineTier::VisionAi,
        }
    }
}

// ============================================================================
// Per-page extraction payloads
// ============================================================================

/// Structured output of one extractor tier for one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageExtract {
    pub page: u32,
    pub text: String,
    /// Tables as rows of cells, when the tier produced tabular structure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Vec<Vec<String>>>,
    /// Mean recognition confidence in [0, 1].
    pub confidence: f64,
}

/// Cost attribution for one page at one tier, in abstract cost units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageCost {
    pub page: u32,
    pub tier: PipelineTier,
    pub cost: f64,
}

/// Final outcome of the cascade for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    pub pipeline: PipelineTier,
    #[serde(default)]
    pub ocr_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_costs: Vec<PageCost>,
}

impl ExtractionResult {
    pub fn total_cost(&self) -> f64 {
        self.page_costs.iter().map(|c| c.cost).sum()
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// What a job produces on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Extract services from a capability attestation.
    Attestation,
    /// Extract quantitative requirements from a tender notice.
    TenderAnalysis,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Attestation => "ATTESTATION",
            JobKind::TenderAnalysis => "TENDER_ANALYSIS",
        }
    }
}

impl FromStr for JobKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATTESTATION" => Ok(JobKind::Attestation),
            "TENDER_ANALYSIS" => Ok(JobKind::TenderAnalysis),
            other => Err(EnumParseError::new("JobKind", other)),
        }
    }
}

/// Job lifecycle state. Transitions are enforced by the store; see
/// `JobStatus::can_transition_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The declared state machine. Retry (terminal → pending) is the only
    /// backward edge and is limited to failed/cancelled jobs.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }
}

impl FromStr for JobStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(EnumParseError::new("JobStatus", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage labels emitted with progress updates, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Texto,
    Ocr,
    Vision,
    Ia,
    Merge,
    Final,
    Save,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStage::Texto => "texto",
            ProgressStage::Ocr => "ocr",
            ProgressStage::Vision => "vision",
            ProgressStage::Ia => "ia",
            ProgressStage::Merge => "merge",
            ProgressStage::Final => "final",
            ProgressStage::Save => "save",
        }
    }
}

impl FromStr for ProgressStage {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "texto" => Ok(ProgressStage::Texto),
            "ocr" => Ok(ProgressStage::Ocr),
            "vision" => Ok(ProgressStage::Vision),
            "ia" => Ok(ProgressStage::Ia),
            "merge" => Ok(ProgressStage::Merge),
            "final" => Ok(ProgressStage::Final),
            "save" => Ok(ProgressStage::Save),
            other => Err(EnumParseError::new("ProgressStage", other)),
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress tuple attached to a job. `current` is monotonically
/// non-decreasing within a stage; `total` is the page count of the stage
/// unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u32,
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ProgressStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineTier>,
}

/// Result payload persisted on job completion, keyed by job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Attestation {
        attestation_id: AttestationId,
        extraction: ExtractionResult,
    },
    TenderAnalysis {
        analysis_id: AnalysisId,
        requirements: Vec<Requirement>,
    },
}

/// Full job snapshot as stored and returned to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub kind: JobKind,
    pub file_path: String,
    pub original_filename: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: JobProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(default)]
    pub cancel_requested: bool,
}

// ============================================================================
// Requirements & analysis
// ============================================================================

fn default_allow_sum() -> bool {
    true
}

/// A quantitative demand from a tender notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub description: String,
    pub required_quantity: f64,
    pub unit: String,
    /// Whether several attestations may sum toward this requirement.
    #[serde(default = "default_allow_sum")]
    pub allow_sum: bool,
    /// Activity tag gating candidates to a keyword family (e.g. paving).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    /// Tokens of which at least one must appear in a candidate description.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mandatory_terms: Vec<String>,
}

/// Verdict for one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Meets,
    Partial,
    Unmet,
}

/// Why a candidate service was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    UnitMismatch,
    ActivityGate,
    MandatoryTerm,
    BelowThreshold,
}

/// One accepted contribution toward a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub attestation_id: AttestationId,
    pub service_index: usize,
    pub quantity: f64,
    pub similarity: f64,
}

/// Scoring detail for every candidate, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateTrace {
    pub attestation_id: AttestationId,
    pub service_index: usize,
    pub similarity: f64,
    pub common_keywords: usize,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionReason>,
}

/// Outcome for a single requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementResult {
    pub requirement: Requirement,
    pub decision: Decision,
    /// `100 * covered / required`, capped at 100.
    pub coverage_pct: f64,
    pub contributions: Vec<Contribution>,
    pub trace: Vec<CandidateTrace>,
}

/// Matcher output over a full requirement set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub requirements: Vec<RequirementResult>,
    /// Summary counters keyed by decision token.
    #[serde(default)]
    pub summary: HashMap<String, u32>,
}

impl AnalysisResult {
    pub fn new(requirements: Vec<RequirementResult>) -> Self {
        let mut summary = HashMap::new();
        for entry in &requirements {
            let key = match entry.decision {
                Decision::Meets => "meets",
                Decision::Partial => "partial",
                Decision::Unmet => "unmet",
            };
            *summary.entry(key.to_string()).or_insert(0) += 1;
        }
        Self {
            requirements,
            summary,
        }
    }
}

// ============================================================================
// Enum parse error
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} token: {value}")]
pub struct EnumParseError {
    kind: &'static str,
    value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_escalation_order() {
        assert_eq!(PipelineTier::NativeText.next(), Some(PipelineTier::LocalOcr));
        assert_eq!(PipelineTier::LocalOcr.next(), Some(PipelineTier::CloudOcr));
        assert_eq!(PipelineTier::CloudOcr.next(), Some(PipelineTier::VisionAi));
        assert_eq!(PipelineTier::VisionAi.next(), None);
        assert!(PipelineTier::VisionAi.is_terminal());
    }

    #[test]
    fn test_status_state_machine() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Pending));
        assert!(Cancelled.can_transition_to(Pending));

        // Illegal edges
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_service_completeness() {
        let mut svc = Service::new("Paving asphalt layer");
        assert!(!svc.is_complete());
        svc.quantity = Some(1200.0);
        assert!(!svc.is_complete());
        svc.unit = Some("M2".to_string());
        assert!(svc.is_complete());
        svc.quantity = Some(0.0);
        assert!(!svc.is_complete());
    }

    #[test]
    fn test_requirement_allow_sum_defaults_true() {
        let req: Requirement = serde_json::from_str(
            r#"{"description": "curb", "required_quantity": 10.0, "unit": "M"}"#,
        )
        .unwrap();
        assert!(req.allow_sum);
        assert!(req.mandatory_terms.is_empty());
    }

    #[test]
    fn test_quality_preferred_tier() {
        assert_eq!(
            DocumentQuality::Native.preferred_tier(),
            PipelineTier::NativeText
        );
        assert_eq!(DocumentQuality::Hard.preferred_tier(), PipelineTier::CloudOcr);
        assert_eq!(
            DocumentQuality::VeryHard.preferred_tier(),
            PipelineTier::VisionAi
        );
    }

    #[test]
    fn test_analysis_summary_counts() {
        let req = Requirement {
            code: None,
            description: "curb".into(),
            required_quantity: 10.0,
            unit: "M".into(),
            allow_sum: true,
            activity: None,
            mandatory_terms: vec![],
        };
        let mk = |decision| RequirementResult {
            requirement: req.clone(),
            decision,
            coverage_pct: 0.0,
            contributions: vec![],
            trace: vec![],
        };
        let result = AnalysisResult::new(vec![
            mk(Decision::Meets),
            mk(Decision::Meets),
            mk(Decision::Unmet),
        ]);
        assert_eq!(result.summary.get("meets"), Some(&2));
        assert_eq!(result.summary.get("unmet"), Some(&1));
        assert_eq!(result.summary.get("partial"), None);
    }
}
