//! Store error type.

use acervo_protocol::JobStatus;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("job {id} not found")]
    JobNotFound { id: i64 },

    #[error("attestation {id} not found")]
    AttestationNotFound { id: i64 },

    #[error("analysis {id} not found")]
    AnalysisNotFound { id: i64 },

    #[error("illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id} has exhausted its {max_attempts} attempts")]
    AttemptsExhausted { id: i64, max_attempts: i32 },

    #[error("job {id} is not in a terminal state")]
    NotTerminal { id: i64 },

    #[error("corrupt row for job {id}: {detail}")]
    CorruptRow { id: i64, detail: String },
}
