//! Schema initialization.
//!
//! Plain `CREATE TABLE IF NOT EXISTS`; there is no migration machinery, the
//! schema is append-only by convention.

use sqlx::{Pool, Sqlite};

use crate::error::StoreResult;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL DEFAULT '',
        display_name TEXT NOT NULL DEFAULT '',
        is_admin INTEGER NOT NULL DEFAULT 0,
        is_approved INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        approved_by INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attestations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        issuer TEXT,
        issue_date TEXT,
        file_path TEXT NOT NULL,
        ocr_text TEXT NOT NULL DEFAULT '',
        services_json TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analyses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        file_path TEXT NOT NULL,
        requirements_json TEXT NOT NULL DEFAULT '[]',
        result_json TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        file_path TEXT NOT NULL,
        original_filename TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        cancelled_at TEXT,
        result_json TEXT,
        error TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        progress_current INTEGER NOT NULL DEFAULT 0,
        progress_total INTEGER NOT NULL DEFAULT 0,
        progress_stage TEXT,
        progress_message TEXT,
        pipeline TEXT,
        cancel_requested INTEGER NOT NULL DEFAULT 0
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, created_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_attestations_user ON attestations(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_analyses_user ON analyses(user_id)",
];

pub(crate) async fn init_schema(pool: &Pool<Sqlite>) -> StoreResult<()> {
    for ddl in TABLES.iter().chain(INDEXES) {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
