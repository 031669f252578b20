//! Control surface: the request/response API the binary and any future
//! transport drive the system through. HTTP routing stays outside; these
//! types are the contract.

use acervo_matcher::{match_requirements, MatchPolicy};
use acervo_protocol::{
    AnalysisId, AnalysisResult, Attestation, AttestationId, Job, JobId, JobKind, JobStatus,
    PipelineConfig, Service, UserId,
};
use acervo_store::{CancelOutcome, JobFilter, JobStats, Store, StoreError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metrics::{Metrics, METRICS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    ListJobs {
        #[serde(default)]
        user_id: Option<UserId>,
        #[serde(default)]
        status: Option<JobStatus>,
        #[serde(default)]
        kind: Option<JobKind>,
        #[serde(default)]
        limit: Option<i64>,
        #[serde(default)]
        offset: Option<i64>,
    },
    GetJob {
        job_id: JobId,
    },
    CancelJob {
        job_id: JobId,
    },
    RetryJob {
        job_id: JobId,
    },
    DeleteJob {
        job_id: JobId,
    },
    QueueStats,
    ListAttestations {
        user_id: UserId,
    },
    GetAttestation {
        attestation_id: AttestationId,
    },
    UpdateAttestationServices {
        attestation_id: AttestationId,
        services: Vec<Service>,
    },
    DeleteAttestation {
        attestation_id: AttestationId,
    },
    GetAnalysis {
        analysis_id: AnalysisId,
    },
    DeleteAnalysis {
        analysis_id: AnalysisId,
    },
    /// Run the matcher over an analysis' requirements and the owner's
    /// current attestations, storing and returning the result.
    RunMatch {
        analysis_id: AnalysisId,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlResponse {
    Jobs(Vec<Job>),
    Job(Job),
    Stats {
        pending: i64,
        processing: i64,
        completed: i64,
        failed: i64,
        cancelled: i64,
    },
    CancelResult {
        cancelled: bool,
        message: String,
    },
    Ok {
        message: String,
    },
    Attestations(Vec<Attestation>),
    Attestation(Box<Attestation>),
    Analysis {
        analysis_id: AnalysisId,
        name: String,
        requirements: usize,
        result: Option<AnalysisResult>,
    },
    MatchResult(AnalysisResult),
    Error {
        code: String,
        message: String,
    },
}

impl ControlResponse {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Serves control requests against the store.
#[derive(Clone)]
pub struct ControlHandler {
    store: Store,
    policy: MatchPolicy,
}

impl ControlHandler {
    pub fn new(store: Store, config: &PipelineConfig) -> Self {
        Self {
            store,
            policy: MatchPolicy::from(config),
        }
    }

    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::ListJobs {
                user_id,
                status,
                kind,
                limit,
                offset,
            } => {
                let filter = JobFilter {
                    user_id,
                    status,
                    kind,
                    limit: limit.unwrap_or(100),
                    offset: offset.unwrap_or(0),
                };
                match self.store.jobs().list(&filter).await {
                    Ok(jobs) => ControlResponse::Jobs(jobs),
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::GetJob { job_id } => match self.store.jobs().get(job_id).await {
                Ok(job) => ControlResponse::Job(job),
                Err(err) => store_error(err),
            },
            ControlRequest::CancelJob { job_id } => {
                match self.store.jobs().cancel(job_id).await {
                    Ok(CancelOutcome::Cancelled) => ControlResponse::CancelResult {
                        cancelled: true,
                        message: "job cancelled".to_string(),
                    },
                    Ok(CancelOutcome::Flagged) => ControlResponse::CancelResult {
                        cancelled: true,
                        message: "cancel requested; worker will stop at its next checkpoint"
                            .to_string(),
                    },
                    Ok(CancelOutcome::AlreadyTerminal) => ControlResponse::CancelResult {
                        cancelled: false,
                        message: "job already finished".to_string(),
                    },
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::RetryJob { job_id } => match self.store.jobs().retry(job_id).await {
                Ok(job) => {
                    Metrics::inc(&METRICS.jobs_retried);
                    info!(job_id = job_id.as_i64(), "job retried via control API");
                    ControlResponse::Job(job)
                }
                Err(err) => store_error(err),
            },
            ControlRequest::DeleteJob { job_id } => match self.store.jobs().delete(job_id).await {
                Ok(()) => ControlResponse::Ok {
                    message: format!("job {job_id} deleted"),
                },
                Err(err) => store_error(err),
            },
            ControlRequest::QueueStats => match self.store.jobs().stats().await {
                Ok(JobStats {
                    pending,
                    processing,
                    completed,
                    failed,
                    cancelled,
                }) => ControlResponse::Stats {
                    pending,
                    processing,
                    completed,
                    failed,
                    cancelled,
                },
                Err(err) => store_error(err),
            },
            ControlRequest::ListAttestations { user_id } => {
                match self.store.attestations().list_for_user(user_id).await {
                    Ok(list) => ControlResponse::Attestations(list),
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::GetAttestation { attestation_id } => {
                match self.store.attestations().get(attestation_id).await {
                    Ok(attestation) => ControlResponse::Attestation(Box::new(attestation)),
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::UpdateAttestationServices {
                attestation_id,
                services,
            } => {
                match self
                    .store
                    .attestations()
                    .update_services(attestation_id, &services)
                    .await
                {
                    Ok(()) => ControlResponse::Ok {
                        message: format!("attestation {attestation_id} updated"),
                    },
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::DeleteAttestation { attestation_id } => {
                match self.store.attestations().delete(attestation_id).await {
                    Ok(()) => ControlResponse::Ok {
                        message: format!("attestation {attestation_id} deleted"),
                    },
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::GetAnalysis { analysis_id } => {
                match self.store.analyses().get(analysis_id).await {
                    Ok(record) => ControlResponse::Analysis {
                        analysis_id: record.id,
                        name: record.name,
                        requirements: record.requirements.len(),
                        result: record.result,
                    },
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::DeleteAnalysis { analysis_id } => {
                match self.store.analyses().delete(analysis_id).await {
                    Ok(()) => ControlResponse::Ok {
                        message: format!("analysis {analysis_id} deleted"),
                    },
                    Err(err) => store_error(err),
                }
            }
            ControlRequest::RunMatch { analysis_id } => self.run_match(analysis_id).await,
        }
    }

    async fn run_match(&self, analysis_id: AnalysisId) -> ControlResponse {
        let record = match self.store.analyses().get(analysis_id).await {
            Ok(record) => record,
            Err(err) => return store_error(err),
        };
        let attestations = match self
            .store
            .attestations()
            .list_for_user(record.user_id)
            .await
        {
            Ok(list) => list,
            Err(err) => return store_error(err),
        };

        let result = match_requirements(&record.requirements, &attestations, &self.policy);
        if let Err(err) = self.store.analyses().set_result(analysis_id, &result).await {
            return store_error(err);
        }
        info!(
            analysis_id = analysis_id.as_i64(),
            requirements = result.requirements.len(),
            "matching completed"
        );
        ControlResponse::MatchResult(result)
    }
}

fn store_error(err: StoreError) -> ControlResponse {
    let code = match &err {
        StoreError::JobNotFound { .. }
        | StoreError::AttestationNotFound { .. }
        | StoreError::AnalysisNotFound { .. } => "NOT_FOUND",
        StoreError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
        StoreError::AttemptsExhausted { .. } => "ATTEMPTS_EXHAUSTED",
        StoreError::NotTerminal { .. } => "NOT_TERMINAL",
        StoreError::Database(_) => "DB_ERROR",
        StoreError::Serde(_) | StoreError::CorruptRow { .. } => "CORRUPT",
    };
    ControlResponse::error(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acervo_store::NewAttestation;

    async fn handler() -> (ControlHandler, Store) {
        let store = Store::open_in_memory().await.unwrap();
        let config = PipelineConfig::default();
        (ControlHandler::new(store.clone(), &config), store)
    }

    #[tokio::test]
    async fn test_get_missing_job_is_not_found() {
        let (handler, _store) = handler().await;
        let response = handler
            .handle(ControlRequest::GetJob {
                job_id: JobId::new(42),
            })
            .await;
        assert!(matches!(
            response,
            ControlResponse::Error { code, .. } if code == "NOT_FOUND"
        ));
    }

    #[tokio::test]
    async fn test_run_match_stores_result() {
        let (handler, store) = handler().await;

        let analysis_id = store
            .analyses()
            .create(acervo_store::NewAnalysis {
                user_id: UserId::new(1),
                name: "Edital".to_string(),
                file_path: "/tmp/edital.pdf".to_string(),
            })
            .await
            .unwrap();
        store
            .analyses()
            .set_requirements(
                analysis_id,
                &[acervo_protocol::Requirement {
                    code: None,
                    description: "Pavimentação asfáltica em CBUQ".to_string(),
                    required_quantity: 500.0,
                    unit: "M2".to_string(),
                    allow_sum: true,
                    activity: None,
                    mandatory_terms: vec![],
                }],
            )
            .await
            .unwrap();

        store
            .attestations()
            .create(NewAttestation {
                user_id: UserId::new(1),
                description: "Atestado".to_string(),
                issuer: None,
                issue_date: None,
                file_path: "/tmp/a.pdf".to_string(),
                ocr_text: String::new(),
                services: vec![Service {
                    item_code: None,
                    description: "Pavimentação asfáltica em CBUQ".to_string(),
                    quantity: Some(800.0),
                    unit: Some("M2".to_string()),
                }],
            })
            .await
            .unwrap();

        let response = handler
            .handle(ControlRequest::RunMatch { analysis_id })
            .await;
        let ControlResponse::MatchResult(result) = response else {
            panic!("expected match result");
        };
        assert_eq!(result.summary.get("meets"), Some(&1));

        // stored for later retrieval
        let record = store.analyses().get(analysis_id).await.unwrap();
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn test_queue_stats_shape() {
        let (handler, store) = handler().await;
        store
            .jobs()
            .create(acervo_store::NewJob {
                user_id: UserId::new(1),
                kind: JobKind::Attestation,
                file_path: "/tmp/x.pdf".to_string(),
                original_filename: "x.pdf".to_string(),
                max_attempts: 3,
            })
            .await
            .unwrap();

        let response = handler.handle(ControlRequest::QueueStats).await;
        assert!(matches!(
            response,
            ControlResponse::Stats { pending: 1, .. }
        ));
    }
}
