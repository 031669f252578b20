//! Scheduler integration tests: bounded concurrency, cancellation and the
//! full claim-to-attestation flow, run against an in-memory store and
//! scripted tier extractors.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acervo_extract::{CancellationToken, Cascade, DocumentRef, TierExtractor};
use acervo_protocol::{
    JobKind, JobResult, JobStatus, PageExtract, PipelineConfig, PipelineResult, PipelineTier,
    UserId,
};
use acervo_queue::Scheduler;
use acervo_store::{NewJob, Store};
use async_trait::async_trait;
use tokio::sync::Semaphore;

/// Tier that waits for a permit before finishing: lets tests freeze jobs
/// mid-processing.
struct GatedTier {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TierExtractor for GatedTier {
    fn tier(&self) -> PipelineTier {
        PipelineTier::NativeText
    }

    fn estimated_cost(&self, _pages: u32) -> f64 {
        0.0
    }

    async fn extract(
        &self,
        _doc: &DocumentRef,
        _pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>> {
        cancel.check()?;
        let _permit = self.gate.acquire().await.expect("gate open");
        cancel.check()?;
        Ok(sample_pages())
    }
}

/// Tier that crawls through page checks on its first run and returns
/// instantly afterwards: lets tests cancel a run, then retry successfully.
struct SlowFirstRunTier {
    calls: AtomicU32,
}

#[async_trait]
impl TierExtractor for SlowFirstRunTier {
    fn tier(&self) -> PipelineTier {
        PipelineTier::NativeText
    }

    fn estimated_cost(&self, _pages: u32) -> f64 {
        0.0
    }

    async fn extract(
        &self,
        _doc: &DocumentRef,
        _pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            // simulate a long multi-page OCR run with per-page checkpoints
            for _ in 0..200 {
                cancel.check()?;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
        Ok(sample_pages())
    }
}

/// Tier that immediately returns a fixed table.
struct InstantTier;

#[async_trait]
impl TierExtractor for InstantTier {
    fn tier(&self) -> PipelineTier {
        PipelineTier::NativeText
    }

    fn estimated_cost(&self, _pages: u32) -> f64 {
        0.0
    }

    async fn extract(
        &self,
        _doc: &DocumentRef,
        _pages: Range<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageExtract>> {
        cancel.check()?;
        Ok(sample_pages())
    }
}

fn sample_pages() -> Vec<PageExtract> {
    vec![PageExtract {
        page: 0,
        text: "PREFEITURA MUNICIPAL DE SANTA RITA\nAssinado em 10/05/2023".to_string(),
        tables: vec![vec![
            vec![
                "1.1".to_string(),
                "Pavimentação asfáltica em CBUQ".to_string(),
                "1.200,00".to_string(),
                "M2".to_string(),
            ],
            vec![
                "1.2".to_string(),
                "Meio-fio de concreto".to_string(),
                "300".to_string(),
                "M".to_string(),
            ],
        ]],
        confidence: 1.0,
    }]
}

fn fast_config(max_concurrent: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.max_concurrent = max_concurrent;
    config.poll_interval_ms = 25;
    config
}

struct Harness {
    store: Store,
    scheduler: Scheduler,
    _dir: tempfile::TempDir,
    file_path: String,
}

async fn harness(extractor: Box<dyn TierExtractor>, max_concurrent: usize) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let file_path = dir.path().join("atestado.pdf");
    std::fs::write(&file_path, b"%PDF-1.4 stub").unwrap();

    let store = Store::open_in_memory().await.unwrap();
    let config = Arc::new(fast_config(max_concurrent));
    let cascade = Arc::new(Cascade::new(&config, vec![extractor], None));
    let mut scheduler = Scheduler::new(store.clone(), cascade, Arc::clone(&config));
    scheduler.start().await.unwrap();

    Harness {
        store,
        scheduler,
        _dir: dir,
        file_path: file_path.to_string_lossy().into_owned(),
    }
}

fn new_job(harness: &Harness, user: i64) -> NewJob {
    NewJob {
        user_id: UserId::new(user),
        kind: JobKind::Attestation,
        file_path: harness.file_path.clone(),
        original_filename: "atestado.pdf".to_string(),
        max_attempts: 3,
    }
}

async fn wait_for_status(store: &Store, id: acervo_protocol::JobId, status: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = store.jobs().get(id).await.unwrap();
        if job.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {status}, job is {}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn attestation_job_runs_end_to_end() {
    let harness = harness(Box::new(InstantTier), 1).await;
    let job = harness
        .store
        .jobs()
        .create(new_job(&harness, 1))
        .await
        .unwrap();

    wait_for_status(&harness.store, job.id, JobStatus::Completed).await;

    let done = harness.store.jobs().get(job.id).await.unwrap();
    let Some(JobResult::Attestation {
        attestation_id,
        extraction,
    }) = done.result
    else {
        panic!("expected attestation result");
    };
    assert_eq!(extraction.pipeline, PipelineTier::NativeText);
    assert_eq!(extraction.services.len(), 2);
    assert_eq!(extraction.services[0].quantity, Some(1200.0));
    assert_eq!(extraction.services[0].unit.as_deref(), Some("M2"));
    assert_eq!(
        extraction.issuer.as_deref(),
        Some("PREFEITURA MUNICIPAL DE SANTA RITA")
    );

    let attestation = harness
        .store
        .attestations()
        .get(attestation_id)
        .await
        .unwrap();
    assert_eq!(attestation.services.len(), 2);
    assert_eq!(attestation.issue_date.as_deref(), Some("10/05/2023"));

    harness.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_and_fifo() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = harness(Box::new(GatedTier { gate: gate.clone() }), 2).await;

    let first = harness.store.jobs().create(new_job(&harness, 1)).await.unwrap();
    let second = harness.store.jobs().create(new_job(&harness, 1)).await.unwrap();
    let third = harness.store.jobs().create(new_job(&harness, 1)).await.unwrap();

    // exactly two jobs enter processing; the third stays pending
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = harness.store.jobs().stats().await.unwrap();
        if stats.processing == 2 {
            assert_eq!(stats.pending, 1);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "workers never claimed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // the two oldest jobs were claimed first
    assert_eq!(
        harness.store.jobs().get(first.id).await.unwrap().status,
        JobStatus::Processing
    );
    assert_eq!(
        harness.store.jobs().get(second.id).await.unwrap().status,
        JobStatus::Processing
    );
    assert_eq!(
        harness.store.jobs().get(third.id).await.unwrap().status,
        JobStatus::Pending
    );

    gate.add_permits(3);
    wait_for_status(&harness.store, first.id, JobStatus::Completed).await;
    wait_for_status(&harness.store, second.id, JobStatus::Completed).await;
    wait_for_status(&harness.store, third.id, JobStatus::Completed).await;

    harness.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_during_processing_then_retry_completes() {
    let harness = harness(
        Box::new(SlowFirstRunTier {
            calls: AtomicU32::new(0),
        }),
        1,
    )
    .await;
    let job = harness.store.jobs().create(new_job(&harness, 1)).await.unwrap();

    wait_for_status(&harness.store, job.id, JobStatus::Processing).await;
    harness.store.jobs().cancel(job.id).await.unwrap();

    // the worker acknowledges within one page's worth of work
    wait_for_status(&harness.store, job.id, JobStatus::Cancelled).await;

    // no attestation leaked from the cancelled run
    let attestations = harness
        .store
        .attestations()
        .list_for_user(UserId::new(1))
        .await
        .unwrap();
    assert!(attestations.is_empty());

    // retry reuses the same job id and reaches completion
    let retried = harness.store.jobs().retry(job.id).await.unwrap();
    assert_eq!(retried.id, job.id);
    wait_for_status(&harness.store, job.id, JobStatus::Completed).await;

    let attestations = harness
        .store
        .attestations()
        .list_for_user(UserId::new(1))
        .await
        .unwrap();
    assert_eq!(attestations.len(), 1);

    harness.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tender_job_creates_analysis_with_requirements() {
    let harness = harness(Box::new(InstantTier), 1).await;
    let job = harness
        .store
        .jobs()
        .create(NewJob {
            user_id: UserId::new(2),
            kind: JobKind::TenderAnalysis,
            file_path: harness.file_path.clone(),
            original_filename: "edital.pdf".to_string(),
            max_attempts: 3,
        })
        .await
        .unwrap();

    wait_for_status(&harness.store, job.id, JobStatus::Completed).await;

    let done = harness.store.jobs().get(job.id).await.unwrap();
    let Some(JobResult::TenderAnalysis {
        analysis_id,
        requirements,
    }) = done.result
    else {
        panic!("expected tender analysis result");
    };
    assert_eq!(requirements.len(), 2);
    assert!(requirements.iter().all(|r| r.allow_sum));

    let record = harness.store.analyses().get(analysis_id).await.unwrap();
    assert_eq!(record.name, "edital");
    assert_eq!(record.requirements.len(), 2);

    harness.scheduler.shutdown().await;
}
