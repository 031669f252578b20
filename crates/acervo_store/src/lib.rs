//! Durable persistence for jobs, attestations and analyses.
//!
//! SQLite behind an async `sqlx` pool. The job queue enforces its state
//! machine inside guarded UPDATE statements, so every transition is atomic
//! with respect to concurrent workers; an illegal transition returns
//! `StoreError::IllegalTransition` and mutates nothing.

mod analyses;
mod attestations;
mod error;
mod jobs;
mod schema;
mod users;

pub use analyses::{AnalysisRecord, AnalysisStore, NewAnalysis};
pub use attestations::{AttestationStore, NewAttestation};
pub use error::{StoreError, StoreResult};
pub use jobs::{CancelOutcome, JobFilter, JobStats, JobStore, NewJob};
pub use users::{UserRecord, UserStore};

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

/// Handle to the SQLite-backed state store. Cheap to clone; all clones
/// share one pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if needed) a store at the given path and run schema
    /// initialization.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        // A single connection keeps the :memory: database alive and shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> StoreResult<()> {
        schema::init_schema(&self.pool).await
    }

    pub fn jobs(&self) -> JobStore<'_> {
        JobStore::new(&self.pool)
    }

    pub fn attestations(&self) -> AttestationStore<'_> {
        AttestationStore::new(&self.pool)
    }

    pub fn analyses(&self) -> AnalysisStore<'_> {
        AnalysisStore::new(&self.pool)
    }

    pub fn users(&self) -> UserStore<'_> {
        UserStore::new(&self.pool)
    }
}
