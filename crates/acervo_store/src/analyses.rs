//! Tender analysis persistence.

use acervo_protocol::{AnalysisId, AnalysisResult, Requirement, UserId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Sqlite};

use crate::error::{StoreError, StoreResult};

pub struct AnalysisStore<'a> {
    pool: &'a Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub user_id: UserId,
    pub name: String,
    pub file_path: String,
}

/// Stored analysis: the requirements extracted from the tender document and
/// (after matching) the result.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub id: AnalysisId,
    pub user_id: UserId,
    pub name: String,
    pub file_path: String,
    pub requirements: Vec<Requirement>,
    pub result: Option<AnalysisResult>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AnalysisRow {
    id: i64,
    user_id: i64,
    name: String,
    file_path: String,
    requirements_json: String,
    result_json: Option<String>,
    created_at: DateTime<Utc>,
}

impl AnalysisRow {
    fn into_record(self) -> StoreResult<AnalysisRecord> {
        let requirements: Vec<Requirement> = serde_json::from_str(&self.requirements_json)?;
        let result = self
            .result_json
            .as_deref()
            .map(serde_json::from_str::<AnalysisResult>)
            .transpose()?;
        Ok(AnalysisRecord {
            id: AnalysisId::new(self.id),
            user_id: UserId::new(self.user_id),
            name: self.name,
            file_path: self.file_path,
            requirements,
            result,
            created_at: self.created_at,
        })
    }
}

impl<'a> AnalysisStore<'a> {
    pub(crate) fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewAnalysis) -> StoreResult<AnalysisId> {
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            "INSERT INTO analyses (user_id, name, file_path, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(new.user_id.as_i64())
        .bind(&new.name)
        .bind(&new.file_path)
        .bind(&now)
        .execute(self.pool)
        .await?
        .last_insert_rowid();
        Ok(AnalysisId::new(id))
    }

    pub async fn get(&self, id: AnalysisId) -> StoreResult<AnalysisRecord> {
        let row: Option<AnalysisRow> = sqlx::query_as("SELECT * FROM analyses WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(self.pool)
            .await?;
        row.ok_or(StoreError::AnalysisNotFound { id: id.as_i64() })?
            .into_record()
    }

    pub async fn list_for_user(&self, user_id: UserId) -> StoreResult<Vec<AnalysisRecord>> {
        let rows: Vec<AnalysisRow> = sqlx::query_as(
            "SELECT * FROM analyses WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id.as_i64())
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(AnalysisRow::into_record).collect()
    }

    /// Store the requirements extracted by a tender-analysis job.
    pub async fn set_requirements(
        &self,
        id: AnalysisId,
        requirements: &[Requirement],
    ) -> StoreResult<()> {
        let json = serde_json::to_string(requirements)?;
        let rows_affected =
            sqlx::query("UPDATE analyses SET requirements_json = ? WHERE id = ?")
                .bind(&json)
                .bind(id.as_i64())
                .execute(self.pool)
                .await?
                .rows_affected();
        if rows_affected == 0 {
            return Err(StoreError::AnalysisNotFound { id: id.as_i64() });
        }
        Ok(())
    }

    /// Store (or replace) the matcher output.
    pub async fn set_result(&self, id: AnalysisId, result: &AnalysisResult) -> StoreResult<()> {
        let json = serde_json::to_string(result)?;
        let rows_affected = sqlx::query("UPDATE analyses SET result_json = ? WHERE id = ?")
            .bind(&json)
            .bind(id.as_i64())
            .execute(self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(StoreError::AnalysisNotFound { id: id.as_i64() });
        }
        Ok(())
    }

    pub async fn delete(&self, id: AnalysisId) -> StoreResult<()> {
        let rows_affected = sqlx::query("DELETE FROM analyses WHERE id = ?")
            .bind(id.as_i64())
            .execute(self.pool)
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(StoreError::AnalysisNotFound { id: id.as_i64() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn test_requirements_and_result_lifecycle() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .analyses()
            .create(NewAnalysis {
                user_id: UserId::new(1),
                name: "Edital 42/2024".to_string(),
                file_path: "/uploads/edital.pdf".to_string(),
            })
            .await
            .unwrap();

        let record = store.analyses().get(id).await.unwrap();
        assert!(record.requirements.is_empty());
        assert!(record.result.is_none());

        let requirements = vec![Requirement {
            code: None,
            description: "Pavimentação asfáltica".to_string(),
            required_quantity: 500.0,
            unit: "M2".to_string(),
            allow_sum: true,
            activity: None,
            mandatory_terms: vec![],
        }];
        store
            .analyses()
            .set_requirements(id, &requirements)
            .await
            .unwrap();

        store
            .analyses()
            .set_result(id, &AnalysisResult::new(vec![]))
            .await
            .unwrap();

        let record = store.analyses().get(id).await.unwrap();
        assert_eq!(record.requirements.len(), 1);
        assert!(record.result.is_some());

        store.analyses().delete(id).await.unwrap();
        assert!(matches!(
            store.analyses().get(id).await.unwrap_err(),
            StoreError::AnalysisNotFound { .. }
        ));
    }
}
