//! Job queue persistence.
//!
//! Claims are atomic: a transaction selects the oldest eligible pending job
//! and flips it to PROCESSING with a guard on the previous status, so two
//! workers can never claim the same job. Every other transition uses the
//! same guarded-UPDATE shape and reports `IllegalTransition` when the guard
//! misses.

use acervo_protocol::{
    Job, JobId, JobKind, JobProgress, JobResult, JobStatus, PipelineTier, ProgressStage, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

pub struct JobStore<'a> {
    pool: &'a Pool<Sqlite>,
}

/// Fields required to enqueue a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: UserId,
    pub kind: JobKind,
    pub file_path: String,
    pub original_filename: String,
    pub max_attempts: i32,
}

/// Outcome of a cancel request; cancel is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Pending job moved straight to CANCELLED.
    Cancelled,
    /// Processing job flagged; the worker acknowledges at its next
    /// checkpoint.
    Flagged,
    /// Job was already terminal; nothing to do.
    AlreadyTerminal,
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<UserId>,
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub limit: i64,
    pub offset: i64,
}

/// Queue counters by status.
#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    user_id: i64,
    file_path: String,
    original_filename: String,
    #[sqlx(rename = "type")]
    kind: String,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    result_json: Option<String>,
    error: Option<String>,
    attempts: i32,
    max_attempts: i32,
    progress_current: i64,
    progress_total: i64,
    progress_stage: Option<String>,
    progress_message: Option<String>,
    pipeline: Option<String>,
    cancel_requested: bool,
}

impl JobRow {
    fn into_job(self) -> StoreResult<Job> {
        let corrupt = |detail: String| StoreError::CorruptRow {
            id: self.id,
            detail,
        };

        let kind: JobKind = self
            .kind
            .parse()
            .map_err(|e| corrupt(format!("type: {e}")))?;
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e| corrupt(format!("status: {e}")))?;
        let stage = self
            .progress_stage
            .as_deref()
            .map(str::parse::<ProgressStage>)
            .transpose()
            .map_err(|e| corrupt(format!("progress_stage: {e}")))?;
        let pipeline = self
            .pipeline
            .as_deref()
            .map(str::parse::<PipelineTier>)
            .transpose()
            .map_err(|e| corrupt(format!("pipeline: {e}")))?;
        let result = self
            .result_json
            .as_deref()
            .map(serde_json::from_str::<JobResult>)
            .transpose()
            .map_err(|e| corrupt(format!("result_json: {e}")))?;

        Ok(Job {
            id: JobId::new(self.id),
            user_id: UserId::new(self.user_id),
            kind,
            file_path: self.file_path,
            original_filename: self.original_filename,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            progress: JobProgress {
                current: self.progress_current.max(0) as u32,
                total: self.progress_total.max(0) as u32,
                stage,
                message: self.progress_message,
                pipeline,
            },
            result,
            error: self.error,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            cancel_requested: self.cancel_requested,
        })
    }
}

impl<'a> JobStore<'a> {
    pub(crate) fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Enqueue a new pending job.
    pub async fn create(&self, new: NewJob) -> StoreResult<Job> {
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO jobs (user_id, file_path, original_filename, type, status, created_at, max_attempts)
            VALUES (?, ?, ?, ?, 'PENDING', ?, ?)
            "#,
        )
        .bind(new.user_id.as_i64())
        .bind(&new.file_path)
        .bind(&new.original_filename)
        .bind(new.kind.as_str())
        .bind(&now)
        .bind(new.max_attempts)
        .execute(self.pool)
        .await?
        .last_insert_rowid();

        debug!(job_id = id, kind = new.kind.as_str(), "job enqueued");
        self.get(JobId::new(id)).await
    }

    /// Atomically claim the oldest eligible pending job.
    ///
    /// FIFO by `created_at`, tie-break by id. Jobs that have exhausted
    /// their attempts are skipped. Claiming counts as starting an attempt,
    /// so `attempts` is incremented here, not on retry.
    pub async fn claim_next(&self) -> StoreResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE status = 'PENDING' AND attempts < max_attempts
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING',
                started_at = ?,
                attempts = attempts + 1,
                cancel_requested = 0
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(&now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Another worker won the race inside this transaction window
            tx.commit().await?;
            return Ok(None);
        }

        let row: JobRow = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(job_id, "claimed job");
        Ok(Some(row.into_job()?))
    }

    /// Record staged progress. Returns true when cancellation has been
    /// requested (or the job is no longer PROCESSING), telling the worker
    /// to abandon work at this checkpoint.
    pub async fn update_progress(&self, id: JobId, progress: &JobProgress) -> StoreResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET progress_current = ?,
                progress_total = ?,
                progress_stage = ?,
                progress_message = ?,
                pipeline = COALESCE(?, pipeline)
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(progress.current as i64)
        .bind(progress.total as i64)
        .bind(progress.stage.map(ProgressStage::as_str))
        .bind(progress.message.as_deref())
        .bind(progress.pipeline.map(PipelineTier::as_str))
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Not processing anymore (e.g. orphan recovery raced us): stop.
            self.ensure_exists(id).await?;
            return Ok(true);
        }

        let cancel_requested: bool =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = ?")
                .bind(id.as_i64())
                .fetch_one(self.pool)
                .await?;
        Ok(cancel_requested)
    }

    /// Complete a processing job with its result payload.
    pub async fn complete(&self, id: JobId, result: &JobResult) -> StoreResult<()> {
        let payload = serde_json::to_string(result)?;
        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'COMPLETED',
                completed_at = ?,
                result_json = ?,
                error = NULL,
                progress_stage = 'save'
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(&now)
        .bind(&payload)
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(self.illegal_transition(id, JobStatus::Completed).await);
        }
        info!(job_id = id.as_i64(), "job completed");
        Ok(())
    }

    /// Fail a processing job with a user-visible error message.
    pub async fn fail(&self, id: JobId, error: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED',
                completed_at = ?,
                error = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(&now)
        .bind(error)
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(self.illegal_transition(id, JobStatus::Failed).await);
        }
        info!(job_id = id.as_i64(), error, "job failed");
        Ok(())
    }

    /// Request cancellation. Pending jobs cancel immediately; processing
    /// jobs are flagged and the worker acknowledges at its next checkpoint;
    /// terminal jobs are left untouched.
    pub async fn cancel(&self, id: JobId) -> StoreResult<CancelOutcome> {
        let now = Utc::now().to_rfc3339();

        let direct = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', cancelled_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(&now)
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();
        if direct > 0 {
            info!(job_id = id.as_i64(), "pending job cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        let flagged = sqlx::query(
            "UPDATE jobs SET cancel_requested = 1 WHERE id = ? AND status = 'PROCESSING'",
        )
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();
        if flagged > 0 {
            info!(job_id = id.as_i64(), "cancel requested for running job");
            return Ok(CancelOutcome::Flagged);
        }

        self.ensure_exists(id).await?;
        Ok(CancelOutcome::AlreadyTerminal)
    }

    /// Worker-side acknowledgement of a cancel request.
    pub async fn acknowledge_cancel(&self, id: JobId) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', cancelled_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(&now)
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(self.illegal_transition(id, JobStatus::Cancelled).await);
        }
        info!(job_id = id.as_i64(), "job cancelled");
        Ok(())
    }

    /// Re-enqueue a failed or cancelled job with its progress reset. The
    /// attempt counter advances when the retried job is claimed again, so
    /// repeating `retry` before that claim is a no-op. Retrying a completed
    /// or processing job is an error.
    pub async fn retry(&self, id: JobId) -> StoreResult<Job> {
        let current = self.get(id).await?;
        match current.status {
            JobStatus::Pending => return Ok(current),
            JobStatus::Failed | JobStatus::Cancelled => {}
            other => {
                return Err(StoreError::IllegalTransition {
                    id: id.as_i64(),
                    from: other,
                    to: JobStatus::Pending,
                })
            }
        }
        if current.attempts >= current.max_attempts {
            return Err(StoreError::AttemptsExhausted {
                id: id.as_i64(),
                max_attempts: current.max_attempts,
            });
        }

        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'PENDING',
                started_at = NULL,
                completed_at = NULL,
                cancelled_at = NULL,
                result_json = NULL,
                error = NULL,
                progress_current = 0,
                progress_total = 0,
                progress_stage = NULL,
                progress_message = NULL,
                pipeline = NULL,
                cancel_requested = 0
            WHERE id = ?
              AND status IN ('FAILED', 'CANCELLED')
              AND attempts < max_attempts
            "#,
        )
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Lost a race; re-read and report accurately
            return Err(self.illegal_transition(id, JobStatus::Pending).await);
        }
        info!(job_id = id.as_i64(), "job requeued for retry");
        self.get(id).await
    }

    pub async fn get(&self, id: JobId) -> StoreResult<Job> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(self.pool)
            .await?;
        row.ok_or(StoreError::JobNotFound { id: id.as_i64() })?
            .into_job()
    }

    pub async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM jobs WHERE 1=1");
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.as_i64());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND type = ").push_bind(kind.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        builder.push(" LIMIT ").push_bind(limit);
        builder.push(" OFFSET ").push_bind(filter.offset.max(0));

        let rows: Vec<JobRow> = builder.build_query_as().fetch_all(self.pool).await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Delete a terminal job.
    pub async fn delete(&self, id: JobId) -> StoreResult<()> {
        let rows_affected = sqlx::query(
            "DELETE FROM jobs WHERE id = ? AND status IN ('COMPLETED', 'FAILED', 'CANCELLED')",
        )
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            self.ensure_exists(id).await?;
            return Err(StoreError::NotTerminal { id: id.as_i64() });
        }
        Ok(())
    }

    /// Queue counters by status.
    pub async fn stats(&self) -> StoreResult<JobStats> {
        let stats: JobStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING') as pending,
                COUNT(*) FILTER (WHERE status = 'PROCESSING') as processing,
                COUNT(*) FILTER (WHERE status = 'COMPLETED') as completed,
                COUNT(*) FILTER (WHERE status = 'FAILED') as failed,
                COUNT(*) FILTER (WHERE status = 'CANCELLED') as cancelled
            FROM jobs
            "#,
        )
        .fetch_one(self.pool)
        .await?;
        Ok(stats)
    }

    /// Requeue jobs left PROCESSING by a dead process. Jobs whose
    /// cancellation was already requested resolve to CANCELLED instead.
    /// Call once at startup, before workers spawn.
    pub async fn recover_orphaned(&self) -> StoreResult<u64> {
        let now = Utc::now().to_rfc3339();
        let cancelled = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', cancelled_at = ?
            WHERE status = 'PROCESSING' AND cancel_requested = 1
            "#,
        )
        .bind(&now)
        .execute(self.pool)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'PENDING',
                started_at = NULL,
                progress_current = 0,
                progress_total = 0,
                progress_stage = NULL,
                progress_message = NULL,
                pipeline = NULL
            WHERE status = 'PROCESSING'
            "#,
        )
        .execute(self.pool)
        .await?
        .rows_affected();

        if cancelled + requeued > 0 {
            info!(requeued, cancelled, "recovered orphaned jobs");
        }
        Ok(requeued)
    }

    async fn ensure_exists(&self, id: JobId) -> StoreResult<()> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::JobNotFound { id: id.as_i64() });
        }
        Ok(())
    }

    async fn illegal_transition(&self, id: JobId, to: JobStatus) -> StoreError {
        match self.get(id).await {
            Ok(job) => StoreError::IllegalTransition {
                id: id.as_i64(),
                from: job.status,
                to,
            },
            Err(err) => err,
        }
    }
}
