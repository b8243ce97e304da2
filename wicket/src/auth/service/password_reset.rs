use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{AuthService, canonical_email, token_expiry, user_not_found};
use crate::auth::password::{generate_token, token_digest};
use crate::db::handlers::{OneTimeTokens, Repository, Users};
use crate::db::models::tokens::TokenKind;
use crate::db::models::users::User;
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_uuid};

/// A pending password reset. The plain token is meant to be delivered out of band.
#[derive(Debug, Clone)]
pub struct PasswordResetTicket {
    pub user_id: UserId,
    pub email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthService {
    /// Start a password reset for `email`, replacing any outstanding reset token.
    ///
    /// Throttled per email, counting requests for unknown addresses too.
    #[instrument(skip_all, err(level = "info"))]
    pub async fn request_password_reset(&self, email: &str) -> Result<PasswordResetTicket> {
        let email = canonical_email(email);
        if email.is_empty() {
            return Err(Error::EmailRequired);
        }
        self.limiter
            .check(&format!("reset:{email}"), self.rate_limits.password_reset)
            .await?;

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;

        let user = Users::new(&mut tx)
            .get_user_by_email(&email)
            .await?
            .ok_or(Error::UserNotFound)?;

        let token = generate_token();
        let expires_at = token_expiry(self.auth.tokens.password_reset_token_duration);
        OneTimeTokens::new(&mut tx, TokenKind::PasswordReset)
            .replace_for_user(user.id, &token_digest(&token), &user.email, expires_at)
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        tracing::info!(user_id = %abbrev_uuid(&user.id), "password reset requested");
        Ok(PasswordResetTicket {
            user_id: user.id,
            email: user.email,
            token,
            expires_at,
        })
    }

    /// Set a new password using a reset token. The token is consumed and every session of the
    /// user is ended.
    #[instrument(skip_all, err(level = "info"))]
    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<User> {
        if new_password.trim().is_empty() {
            return Err(Error::PasswordRequired);
        }
        if token.is_empty() {
            return Err(Error::TokenNotFound);
        }

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;

        let record = OneTimeTokens::new(&mut tx, TokenKind::PasswordReset)
            .find_by_digest(&token_digest(token))
            .await?
            .ok_or(Error::TokenNotFound)?;
        if record.is_expired() {
            return Err(Error::TokenExpired);
        }

        let password_hash = self.hash_password(new_password.to_string()).await?;
        let user = Users::new(&mut tx)
            .set_password(record.user_id, &password_hash)
            .await
            .map_err(user_not_found)?;
        OneTimeTokens::new(&mut tx, TokenKind::PasswordReset)
            .delete_for_user(user.id)
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        let ended = self.sessions.delete_by_user_id(user.id).await?;
        tracing::info!(user_id = %abbrev_uuid(&user.id), ended, "password reset completed");
        Ok(user)
    }

    /// Set a user's password directly. Any pending reset token is dropped and every session of the
    /// user is ended.
    #[instrument(skip(self, new_password), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn reset_password(&self, user_id: UserId, new_password: &str) -> Result<User> {
        if new_password.trim().is_empty() {
            return Err(Error::PasswordRequired);
        }

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;

        Users::new(&mut tx).get_required(user_id).await.map_err(user_not_found)?;

        let password_hash = self.hash_password(new_password.to_string()).await?;
        let user = Users::new(&mut tx)
            .set_password(user_id, &password_hash)
            .await
            .map_err(user_not_found)?;
        OneTimeTokens::new(&mut tx, TokenKind::PasswordReset)
            .delete_for_user(user_id)
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        self.sessions.delete_by_user_id(user_id).await?;
        Ok(user)
    }
}
