//! Database repository for durable session records.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{errors::Result, models::sessions::SessionRecord};
use crate::types::{UserId, abbrev_uuid};

const SELECT_RECORD: &str = r#"
    SELECT id, user_id, user_agent, ip, payload::text AS payload, expires_at, created_at, updated_at
    FROM sessions
"#;

/// Database request for writing a session record
#[derive(Debug, Clone)]
pub struct SessionUpsertDBRequest<'a> {
    pub id: &'a str,
    pub user_id: Option<UserId>,
    pub user_agent: &'a str,
    pub ip: &'a str,
    pub payload: &'a str,
    pub expires_at: DateTime<Utc>,
}

pub struct Sessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert or update a session record. Returns false when the stored record comes from a later
    /// save (higher counter) and was kept.
    #[instrument(skip(self, request), fields(user_id = ?request.user_id.as_ref().map(abbrev_uuid)), err)]
    pub async fn upsert(&mut self, request: &SessionUpsertDBRequest<'_>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, user_agent, ip, payload, expires_at)
            VALUES ($1, $2, $3, $4, $5::jsonb, $6)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                user_agent = EXCLUDED.user_agent,
                ip = EXCLUDED.ip,
                payload = EXCLUDED.payload,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            WHERE (sessions.payload->>'counter')::bigint <= (EXCLUDED.payload->>'counter')::bigint
            "#,
        )
        .bind(request.id)
        .bind(request.user_id)
        .bind(request.user_agent)
        .bind(request.ip)
        .bind(request.payload)
        .bind(request.expires_at)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, err)]
    pub async fn get(&mut self, id: &str) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!("{SELECT_RECORD} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(record)
    }

    /// Unexpired sessions of a user, most recently updated first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn for_user(&mut self, user_id: UserId) -> Result<Vec<SessionRecord>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "{SELECT_RECORD} WHERE user_id = $1 AND expires_at > NOW() ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(records)
    }

    #[instrument(skip_all, err)]
    pub async fn delete(&mut self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_expired(&mut self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
