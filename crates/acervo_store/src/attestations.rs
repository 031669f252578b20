//! Attestation persistence.
//!
//! An attestation row is created only when a job completes successfully;
//! after that, only its services list may change (user edits).

use acervo_protocol::{Attestation, AttestationId, Service, UserId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Sqlite};

use crate::error::{StoreError, StoreResult};

pub struct AttestationStore<'a> {
    pool: &'a Pool<Sqlite>,
}

/// Fields for the row created at job completion.
#[derive(Debug, Clone)]
pub struct NewAttestation {
    pub user_id: UserId,
    pub description: String,
    pub issuer: Option<String>,
    pub issue_date: Option<String>,
    pub file_path: String,
    pub ocr_text: String,
    pub services: Vec<Service>,
}

#[derive(Debug, FromRow)]
struct AttestationRow {
    id: i64,
    user_id: i64,
    description: String,
    issuer: Option<String>,
    issue_date: Option<String>,
    file_path: String,
    ocr_text: String,
    services_json: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AttestationRow {
    fn into_attestation(self) -> StoreResult<Attestation> {
        let services: Vec<Service> = serde_json::from_str(&self.services_json)?;
        Ok(Attestation {
            id: AttestationId::new(self.id),
            user_id: UserId::new(self.user_id),
            description: self.description,
            issuer: self.issuer,
            issue_date: self.issue_date,
            file_path: self.file_path,
            ocr_text: self.ocr_text,
            services,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl<'a> AttestationStore<'a> {
    pub(crate) fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewAttestation) -> StoreResult<AttestationId> {
        let services_json = serde_json::to_string(&new.services)?;
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO attestations
                (user_id, description, issuer, issue_date, file_path, ocr_text, services_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.user_id.as_i64())
        .bind(&new.description)
        .bind(new.issuer.as_deref())
        .bind(new.issue_date.as_deref())
        .bind(&new.file_path)
        .bind(&new.ocr_text)
        .bind(&services_json)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?
        .last_insert_rowid();
        Ok(AttestationId::new(id))
    }

    pub async fn get(&self, id: AttestationId) -> StoreResult<Attestation> {
        let row: Option<AttestationRow> =
            sqlx::query_as("SELECT * FROM attestations WHERE id = ?")
                .bind(id.as_i64())
                .fetch_optional(self.pool)
                .await?;
        row.ok_or(StoreError::AttestationNotFound { id: id.as_i64() })?
            .into_attestation()
    }

    /// All attestations of one user, oldest first (matcher tie-breaks rely
    /// on this order).
    pub async fn list_for_user(&self, user_id: UserId) -> StoreResult<Vec<Attestation>> {
        let rows: Vec<AttestationRow> = sqlx::query_as(
            "SELECT * FROM attestations WHERE user_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id.as_i64())
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(AttestationRow::into_attestation).collect()
    }

    /// Replace the services list (user edits: add/update/delete).
    pub async fn update_services(
        &self,
        id: AttestationId,
        services: &[Service],
    ) -> StoreResult<()> {
        let services_json = serde_json::to_string(services)?;
        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            "UPDATE attestations SET services_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&services_json)
        .bind(&now)
        .bind(id.as_i64())
        .execute(self.pool)
        .await?
        .rows_affected();
        if rows_affected == 0 {
            return Err(StoreError::AttestationNotFound { id: id.as_i64() });
        }
        Ok(())
    }

    pub async fn delete(&self, id: AttestationId) -> StoreResult<()> {
        let rows_affected = sqlx::query("DELETE FROM attestations WHERE id = ?")
            .bind(id.as_i64())
            .execute(self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(StoreError::AttestationNotFound { id: id.as_i64() });
        }
        Ok(())
    }
}
