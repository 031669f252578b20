//! Minimal user records.
//!
//! Authentication and role management live outside this system; the store
//! only keeps enough to attribute attestations and jobs to an owner. The
//! approval relation (`approved_by`) is a weak back-reference resolved by
//! lookup, never ownership.

use acervo_protocol::UserId;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Sqlite};

use crate::error::StoreResult;

pub struct UserStore<'a> {
    pool: &'a Pool<Sqlite>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub is_admin: bool,
    pub is_approved: bool,
    pub is_active: bool,
    pub approved_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl<'a> UserStore<'a> {
    pub(crate) fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Fetch a user by email, creating an active record on first sight.
    pub async fn ensure(&self, email: &str, display_name: &str) -> StoreResult<UserId> {
        if let Some(id) = self.find_by_email(email).await? {
            return Ok(id);
        }
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO users (email, display_name, is_approved, created_at)
            VALUES (?, ?, 1, ?)
            "#,
        )
        .bind(email)
        .bind(display_name)
        .bind(&now)
        .execute(self.pool)
        .await?
        .last_insert_rowid();
        Ok(UserId::new(id))
    }

    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserId>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(self.pool)
            .await?;
        Ok(id.map(UserId::new))
    }

    pub async fn get(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        let row: Option<UserRecord> = sqlx::query_as(
            r#"
            SELECT id, email, display_name, is_admin, is_approved, is_active, approved_by, created_at
            FROM users WHERE id = ?
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let users = store.users();
        let a = users.ensure("eng@example.com", "Eng").await.unwrap();
        let b = users.ensure("eng@example.com", "Someone Else").await.unwrap();
        assert_eq!(a, b);

        let record = users.get(a).await.unwrap().unwrap();
        assert_eq!(record.display_name, "Eng");
        assert!(record.is_approved);
        assert!(record.approved_by.is_none());
    }
}
