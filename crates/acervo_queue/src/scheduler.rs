//! Worker scheduler.
//!
//! Claim → run cascade → persist outcome, with up to `max_concurrent`
//! workers. Cancellation reaches a running job two ways: the progress pump
//! learns the flag from each progress write, and a poller checks the job
//! row every poll interval so quiet stages still observe it promptly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use acervo_extract::{CancellationToken, Cascade};
use acervo_protocol::{
    ExtractionResult, Job, JobKind, JobResult, PipelineConfig, PipelineError,
};
use acervo_store::{NewAnalysis, NewAttestation, Store, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::convert::requirements_from_services;
use crate::metrics::{Metrics, METRICS};
use crate::progress::ProgressRegistry;

/// Attempts for persistence calls that must not be dropped on a hiccup.
const STORE_RETRIES: u32 = 3;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(250);

pub struct Scheduler {
    store: Store,
    cascade: Arc<Cascade>,
    config: Arc<PipelineConfig>,
    registry: ProgressRegistry,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(store: Store, cascade: Arc<Cascade>, config: Arc<PipelineConfig>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            cascade,
            config,
            registry: ProgressRegistry::new(),
            shutdown,
            workers: Vec::new(),
        }
    }

    pub fn registry(&self) -> ProgressRegistry {
        self.registry.clone()
    }

    /// Recover orphans from a previous run and spawn the worker pool.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let recovered = self.store.jobs().recover_orphaned().await?;
        if recovered > 0 {
            info!(recovered, "requeued jobs from previous run");
        }

        for worker_id in 0..self.config.max_concurrent {
            let store = self.store.clone();
            let cascade = Arc::clone(&self.cascade);
            let config = Arc::clone(&self.config);
            let registry = self.registry.clone();
            let shutdown_rx = self.shutdown.subscribe();
            self.workers.push(tokio::spawn(worker_loop(
                worker_id,
                store,
                cascade,
                config,
                registry,
                shutdown_rx,
            )));
        }
        info!(workers = self.config.max_concurrent, "scheduler started");
        Ok(())
    }

    /// Signal shutdown and wait for workers to drain their current jobs.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Store,
    cascade: Arc<Cascade>,
    config: Arc<PipelineConfig>,
    registry: ProgressRegistry,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match store.jobs().claim_next().await {
            Ok(Some(job)) => {
                Metrics::inc(&METRICS.jobs_claimed);
                run_job(&store, &cascade, &config, &registry, job).await;
            }
            Ok(None) => {
                // idle: wait out the poll interval or a shutdown signal
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval()) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(err) => {
                Metrics::inc(&METRICS.store_errors);
                error!(worker_id, %err, "claim failed, backing off");
                tokio::time::sleep(config.poll_interval()).await;
            }
        }
    }
    info!(worker_id, "worker stopped");
}

async fn run_job(
    store: &Store,
    cascade: &Cascade,
    config: &PipelineConfig,
    registry: &ProgressRegistry,
    job: Job,
) {
    let job_id = job.id;
    info!(job_id = job_id.as_i64(), kind = job.kind.as_str(), "job started");
    registry.publish(job.clone());

    let cancel = CancellationToken::new();
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();

    // pump: persist progress, mirror snapshots to subscribers, observe the
    // cancel flag piggybacked on each write
    let pump = {
        let store = store.clone();
        let registry = registry.clone();
        let cancel = cancel.clone();
        let mut snapshot = job.clone();
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                match store.jobs().update_progress(snapshot.id, &progress).await {
                    Ok(cancel_requested) => {
                        if cancel_requested {
                            cancel.cancel();
                        }
                    }
                    Err(err) => warn!(%err, "progress write failed"),
                }
                snapshot.progress = progress;
                registry.publish(snapshot.clone());
            }
        })
    };

    // poller: quiet stages still observe cancellation within a poll interval
    let poller_stop = CancellationToken::new();
    let poller = {
        let store = store.clone();
        let cancel = cancel.clone();
        let stop = poller_stop.clone();
        let interval = config.poll_interval();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                tokio::time::sleep(interval).await;
                if stop.is_cancelled() {
                    break;
                }
                match store.jobs().get(job_id).await {
                    Ok(current) => {
                        if current.cancel_requested {
                            cancel.cancel();
                        }
                        if current.status.is_terminal() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "cancel poll failed"),
                }
            }
        })
    };

    let outcome = cascade
        .process(Path::new(&job.file_path), None, &cancel, &progress_tx)
        .await;
    drop(progress_tx);
    let _ = pump.await;
    poller_stop.cancel();
    poller.abort();

    finalize(store, &job, outcome, &cancel).await;

    match store.jobs().get(job_id).await {
        Ok(final_job) => registry.finish(final_job),
        Err(err) => warn!(%err, "could not read final job snapshot"),
    }
}

async fn finalize(
    store: &Store,
    job: &Job,
    outcome: Result<ExtractionResult, PipelineError>,
    cancel: &CancellationToken,
) {
    match outcome {
        Ok(extraction) => {
            // cancellation observed after the last stage still wins
            if cancel.is_cancelled() {
                acknowledge_cancel(store, job).await;
                return;
            }
            if let Err(err) = persist_success(store, job, extraction).await {
                error!(job_id = job.id.as_i64(), %err, "failed to persist result");
                Metrics::inc(&METRICS.store_errors);
                let message = format!("STORAGE: {err}");
                if let Err(fail_err) = store.jobs().fail(job.id, &message).await {
                    error!(job_id = job.id.as_i64(), %fail_err, "failed to mark job failed");
                } else {
                    Metrics::inc(&METRICS.jobs_failed);
                }
            }
        }
        Err(PipelineError::Cancelled) => acknowledge_cancel(store, job).await,
        Err(err) => {
            let message = format!("{}: {err}", err.code());
            match store.jobs().fail(job.id, &message).await {
                Ok(()) => Metrics::inc(&METRICS.jobs_failed),
                Err(fail_err) => {
                    error!(job_id = job.id.as_i64(), %fail_err, "failed to mark job failed")
                }
            }
        }
    }
}

async fn persist_success(
    store: &Store,
    job: &Job,
    extraction: ExtractionResult,
) -> Result<(), StoreError> {
    let jobs = store.jobs();
    match job.kind {
        JobKind::Attestation => {
            let attestations = store.attestations();
            let new = NewAttestation {
                user_id: job.user_id,
                description: display_name(&job.original_filename),
                issuer: extraction.issuer.clone(),
                issue_date: extraction.issue_date.clone(),
                file_path: job.file_path.clone(),
                ocr_text: extraction.ocr_text.clone(),
                services: extraction.services.clone(),
            };
            let attestation_id = with_store_retry(|| attestations.create(new.clone())).await?;
            Metrics::inc(&METRICS.attestations_created);

            let result = JobResult::Attestation {
                attestation_id,
                extraction,
            };
            with_store_retry(|| jobs.complete(job.id, &result)).await?;
        }
        JobKind::TenderAnalysis => {
            let analyses = store.analyses();
            let requirements = requirements_from_services(&extraction.services);
            let new = NewAnalysis {
                user_id: job.user_id,
                name: display_name(&job.original_filename),
                file_path: job.file_path.clone(),
            };
            let analysis_id = with_store_retry(|| analyses.create(new.clone())).await?;
            with_store_retry(|| analyses.set_requirements(analysis_id, &requirements)).await?;
            Metrics::inc(&METRICS.analyses_created);

            let result = JobResult::TenderAnalysis {
                analysis_id,
                requirements,
            };
            with_store_retry(|| jobs.complete(job.id, &result)).await?;
        }
    }
    Metrics::inc(&METRICS.jobs_completed);
    info!(job_id = job.id.as_i64(), "job finished");
    Ok(())
}

async fn acknowledge_cancel(store: &Store, job: &Job) {
    match store.jobs().acknowledge_cancel(job.id).await {
        Ok(()) => {
            Metrics::inc(&METRICS.jobs_cancelled);
            info!(job_id = job.id.as_i64(), "job cancelled by request");
        }
        Err(err) => warn!(job_id = job.id.as_i64(), %err, "cancel acknowledgement failed"),
    }
}

/// Retry transient persistence failures; anything else surfaces at once.
async fn with_store_retry<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut last = None;
    for attempt in 1..=STORE_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Database(err)) => {
                warn!(attempt, %err, "store call failed, retrying");
                last = Some(StoreError::Database(err));
                if attempt < STORE_RETRIES {
                    tokio::time::sleep(STORE_RETRY_DELAY).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.expect("at least one attempt"))
}

fn display_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_strips_extension() {
        assert_eq!(display_name("atestado-prefeitura.pdf"), "atestado-prefeitura");
        assert_eq!(display_name("scan.PNG"), "scan");
        assert_eq!(display_name("semextensao"), "semextensao");
    }
}
