//! Authentication flows.
//!
//! [`AuthService`] ties the pieces together: it checks credentials, throttles login and reset
//! attempts, resolves permissions and keeps sessions in the configured [`SessionStore`]. Every
//! flow that writes more than one row runs in a single transaction; dropping a flow's future
//! before it finishes rolls the transaction back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::auth::password::{self, Argon2Params};
use crate::auth::permissions::{self, Permissions};
use crate::auth::session::Session;
use crate::auth::session_store::{CacheSessionStore, PgSessionStore, SessionStore, TieredSessionStore};
use crate::cache::Cache;
use crate::config::{AuthConfig, Config, RateLimitsConfig};
use crate::db::errors::DbError;
use crate::db::handlers::{Repository, Users};
use crate::db::models::groups::Group;
use crate::errors::{Error, Result};
use crate::limits::RateLimiter;
use crate::types::{UserId, abbrev_uuid};

mod login;
mod password_reset;
mod registration;

pub use password_reset::PasswordResetTicket;
pub use registration::{Registration, RegistrationRequest};

/// Where a request came from, recorded on the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: String,
    pub ip: String,
}

impl ClientInfo {
    pub fn new(user_agent: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ip: ip.into(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    limiter: RateLimiter,
    sessions: Arc<dyn SessionStore>,
    auth: AuthConfig,
    rate_limits: RateLimitsConfig,
    argon2: Argon2Params,
}

impl AuthService {
    /// Build the service with the session store described by the configuration: the cache in
    /// front of the `sessions` table.
    pub fn new(db: PgPool, cache: Arc<dyn Cache>, config: &Config) -> Self {
        let session_config = &config.auth.session;
        let primary = Arc::new(CacheSessionStore::new(cache.clone(), session_config.key_prefix.as_str()));
        let durable = Arc::new(PgSessionStore::new(db.clone()));
        let sessions = TieredSessionStore::new(primary, durable, session_config.durability)
            .with_recovery(session_config.recover_from_durable);

        Self::with_session_store(db, RateLimiter::new(cache), Arc::new(sessions), config)
    }

    pub fn with_session_store(db: PgPool, limiter: RateLimiter, sessions: Arc<dyn SessionStore>, config: &Config) -> Self {
        Self {
            db,
            limiter,
            sessions,
            auth: config.auth.clone(),
            rate_limits: config.rate_limits.clone(),
            argon2: Argon2Params::from(&config.auth.password),
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// A user's groups, highest priority first, and their effective permissions.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn resolve_access(&self, user_id: UserId) -> Result<(Vec<Group>, Permissions)> {
        let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        Ok(permissions::resolve_for_user(&mut conn, user_id).await?)
    }

    /// Reload the user, groups and permissions carried by a session and save it. Needed after a
    /// change of group membership or permission overrides.
    ///
    /// A session whose user no longer exists is deleted and [`Error::UserNotFound`] returned.
    #[instrument(skip_all, err)]
    pub async fn refresh_session(&self, session: &mut Session) -> Result<()> {
        if let Some(user_id) = session.user_id() {
            let user = {
                let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
                Users::new(&mut conn).get_by_id(user_id).await?
            };
            let Some(user) = user else {
                self.sessions.delete(session).await?;
                return Err(Error::UserNotFound);
            };

            let (groups, permissions) = self.resolve_access(user_id).await?;
            session.user = Some((&user).into());
            session.set_access(&groups, permissions);
        }

        self.sessions.save(session).await
    }

    /// Load a live session by id.
    pub async fn session(&self, id: &str) -> Result<Session> {
        self.sessions.get(id).await
    }

    /// Start an anonymous session.
    #[instrument(skip_all, err)]
    pub async fn anonymous_session(&self, client: ClientInfo) -> Result<Session> {
        let mut session = Session::new(self.auth.session.duration).with_client(client.user_agent, client.ip);
        self.sessions.save(&mut session).await?;
        Ok(session)
    }

    /// End a session. The caller continues with the returned brand-new anonymous session.
    #[instrument(skip_all, fields(user_id = ?session.user_id().as_ref().map(abbrev_uuid)), err)]
    pub async fn logout(&self, session: &Session) -> Result<Session> {
        self.sessions.delete(session).await?;
        self.anonymous_session(ClientInfo::new(session.user_agent.clone(), session.ip.clone()))
            .await
    }

    /// Delete a user after removing all of their sessions.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_user(&self, user_id: UserId) -> Result<()> {
        let removed = self.sessions.delete_by_user_id(user_id).await?;
        tracing::debug!(removed, "deleted sessions of user");

        let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        if !Users::new(&mut conn).delete(user_id).await? {
            return Err(Error::UserNotFound);
        }
        Ok(())
    }

    /// Hash a password on a blocking thread to avoid blocking the async runtime
    async fn hash_password(&self, plain: String) -> Result<String> {
        let params = self.argon2;
        tokio::task::spawn_blocking(move || password::hash_password(&plain, params))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password hashing task: {e}"),
            })?
    }

    async fn verify_password(&self, stored_hash: String, candidate: String) -> Result<bool> {
        tokio::task::spawn_blocking(move || password::verify_password(&stored_hash, &candidate))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password verification task: {e}"),
            })
    }
}

/// Emails are compared and stored trimmed and lower-cased.
pub(crate) fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Absent users surface as [`Error::UserNotFound`] rather than a bare database error.
pub(crate) fn user_not_found(err: DbError) -> Error {
    match err {
        DbError::NotFound => Error::UserNotFound,
        other => Error::Database(other),
    }
}

fn token_expiry(ttl: std::time::Duration) -> DateTime<Utc> {
    crate::auth::session::expiry_after(ttl)
}
