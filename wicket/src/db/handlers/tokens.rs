//! Database repository for one-time tokens (registration confirmation, password reset).
//!
//! Each [`TokenKind`] has its own table with one row per user: issuing a new token replaces the
//! previous one. Only the digest of a token is stored, so lookups are by digest.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::Result,
    models::tokens::{TokenKind, TokenRecord},
};
use crate::types::{UserId, abbrev_uuid};

pub struct OneTimeTokens<'c> {
    db: &'c mut PgConnection,
    kind: TokenKind,
}

impl<'c> OneTimeTokens<'c> {
    pub fn new(db: &'c mut PgConnection, kind: TokenKind) -> Self {
        Self { db, kind }
    }

    /// Store a token for the user, replacing any outstanding one of the same kind.
    #[instrument(skip(self, token_hash, email), fields(kind = ?self.kind, user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn replace_for_user(
        &mut self,
        user_id: UserId,
        token_hash: &str,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<TokenRecord> {
        let sql = format!(
            r#"
            INSERT INTO {} (user_id, token_hash, email, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                token_hash = EXCLUDED.token_hash,
                email = EXCLUDED.email,
                expires_at = EXCLUDED.expires_at
            RETURNING *
            "#,
            self.kind.table()
        );

        let record = sqlx::query_as::<_, TokenRecord>(&sql)
            .bind(user_id)
            .bind(token_hash)
            .bind(email)
            .bind(expires_at)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(record)
    }

    /// Look a token up by digest, expired or not.
    #[instrument(skip(self, token_hash), fields(kind = ?self.kind), err)]
    pub async fn find_by_digest(&mut self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let sql = format!("SELECT * FROM {} WHERE token_hash = $1", self.kind.table());

        let record = sqlx::query_as::<_, TokenRecord>(&sql)
            .bind(token_hash)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(record)
    }

    #[instrument(skip(self), fields(kind = ?self.kind, user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_for_user(&mut self, user_id: UserId) -> Result<Option<TokenRecord>> {
        let sql = format!("SELECT * FROM {} WHERE user_id = $1", self.kind.table());

        let record = sqlx::query_as::<_, TokenRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(record)
    }

    #[instrument(skip(self), fields(kind = ?self.kind, user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE user_id = $1", self.kind.table());

        let result = sqlx::query(&sql).bind(user_id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove every token of this kind whose expiry has passed.
    #[instrument(skip(self), fields(kind = ?self.kind), err)]
    pub async fn delete_expired(&mut self) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE expires_at < NOW()", self.kind.table());

        let result = sqlx::query(&sql).execute(&mut *self.db).await?;

        Ok(result.rows_affected())
    }
}
