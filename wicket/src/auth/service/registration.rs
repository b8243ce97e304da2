use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{AuthService, canonical_email, token_expiry, user_not_found};
use crate::auth::password::{generate_token, token_digest};
use crate::db::handlers::{OneTimeTokens, Repository, Users};
use crate::db::models::tokens::TokenKind;
use crate::db::models::users::{User, UserCreateDBRequest};
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_uuid};

#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
}

/// A new (or renewed) registration. `token` is only ever available here; the database keeps its
/// digest.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthService {
    /// Create an unconfirmed user together with a confirmation token.
    #[instrument(skip_all, err(level = "info"))]
    pub async fn register(&self, request: RegistrationRequest) -> Result<Registration> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::NameRequired);
        }
        let email = canonical_email(&request.email);
        if email.is_empty() {
            return Err(Error::EmailRequired);
        }
        if request.password.trim().is_empty() {
            return Err(Error::PasswordRequired);
        }

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;

        if Users::new(&mut tx).get_user_by_email(&email).await?.is_some() {
            return Err(Error::UserExists);
        }

        let password_hash = self.hash_password(request.password).await?;

        let user = Users::new(&mut tx)
            .create(&UserCreateDBRequest {
                name: name.to_string(),
                email,
                phone: request.phone.trim().to_string(),
                password_hash,
            })
            .await
            .map_err(|e| {
                // Lost a race with a concurrent registration of the same email
                if e.is_unique_violation_on("users") {
                    Error::UserExists
                } else {
                    Error::Database(e)
                }
            })?;

        let token = generate_token();
        let expires_at = token_expiry(self.auth.tokens.registration_token_duration);
        OneTimeTokens::new(&mut tx, TokenKind::Registration)
            .replace_for_user(user.id, &token_digest(&token), &user.email, expires_at)
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        tracing::info!(user_id = %abbrev_uuid(&user.id), "user registered");
        Ok(Registration { user, token, expires_at })
    }

    /// Confirm a registration with the token handed out by [`AuthService::register`].
    #[instrument(skip_all, err(level = "info"))]
    pub async fn confirm_registration(&self, token: &str) -> Result<User> {
        if token.is_empty() {
            return Err(Error::InvalidToken);
        }

        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;

        let record = OneTimeTokens::new(&mut tx, TokenKind::Registration)
            .find_by_digest(&token_digest(token))
            .await?
            .ok_or(Error::InvalidToken)?;
        if record.is_expired() {
            return Err(Error::TokenExpired);
        }

        let user = Users::new(&mut tx).confirm(record.user_id).await.map_err(user_not_found)?;
        OneTimeTokens::new(&mut tx, TokenKind::Registration)
            .delete_for_user(user.id)
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;

        tracing::info!(user_id = %abbrev_uuid(&user.id), "registration confirmed");
        Ok(user)
    }

    /// Issue a fresh confirmation token, replacing any outstanding one.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn renew_registration(&self, user_id: UserId) -> Result<Registration> {
        let mut tx = self.db.begin().await.map_err(|e| Error::Database(e.into()))?;

        let user = Users::new(&mut tx).get_required(user_id).await.map_err(user_not_found)?;

        let token = generate_token();
        let expires_at = token_expiry(self.auth.tokens.registration_token_duration);
        OneTimeTokens::new(&mut tx, TokenKind::Registration)
            .replace_for_user(user.id, &token_digest(&token), &user.email, expires_at)
            .await?;

        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        Ok(Registration { user, token, expires_at })
    }
}
