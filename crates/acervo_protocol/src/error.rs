//! Error taxonomy for the processing pipeline.
//!
//! Recovery policy per kind:
//! - `Validation` is surfaced at the API boundary and never enqueued.
//! - `TransientExtractor` is retried inside the adapter; exhausted retries
//!   escalate to the next tier.
//! - `PermanentExtractor` escalates to the next tier immediately.
//! - `TerminalExtractor` fails the job (the last tier already failed).
//! - `Cancelled` resolves the job to the cancelled state.
//! - `Invariant` fails the job without automatic retry.
//! - `Storage` is retried with backoff by the worker.

use thiserror::Error;

use crate::defaults::MAX_PROVIDER_MESSAGE_LEN;
use crate::types::PipelineTier;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("invalid input: {message}")]
    Validation { message: String },

    #[error("transient failure at {tier}: {message}")]
    TransientExtractor { tier: PipelineTier, message: String },

    #[error("permanent failure at {tier}: {message}")]
    PermanentExtractor { tier: PipelineTier, message: String },

    #[error("terminal tier failed: {message}")]
    TerminalExtractor { message: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("invariant violation: {message}")]
    Invariant { message: String },

    #[error("storage unavailable: {message}")]
    Storage { message: String },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transient(tier: PipelineTier, message: impl Into<String>) -> Self {
        Self::TransientExtractor {
            tier,
            message: trim_message(message.into()),
        }
    }

    pub fn permanent(tier: PipelineTier, message: impl Into<String>) -> Self {
        Self::PermanentExtractor {
            tier,
            message: trim_message(message.into()),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::TerminalExtractor {
            message: trim_message(message.into()),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Short stable code carried alongside the long message.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "VALIDATION",
            PipelineError::TransientExtractor { .. } => "EXTRACTOR_TRANSIENT",
            PipelineError::PermanentExtractor { .. } => "EXTRACTOR_PERMANENT",
            PipelineError::TerminalExtractor { .. } => "EXTRACTOR_TERMINAL",
            PipelineError::Cancelled => "CANCELLED",
            PipelineError::Invariant { .. } => "INVARIANT",
            PipelineError::Storage { .. } => "STORAGE",
        }
    }

    /// Whether the cascade may move to the next tier after this error.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientExtractor { .. } | PipelineError::PermanentExtractor { .. }
        )
    }
}

/// Provider messages can embed entire response bodies; keep them bounded.
fn trim_message(message: String) -> String {
    if message.chars().count() <= MAX_PROVIDER_MESSAGE_LEN {
        return message;
    }
    let mut trimmed: String = message.chars().take(MAX_PROVIDER_MESSAGE_LEN).collect();
    trimmed.push('…');
    trimmed
}
