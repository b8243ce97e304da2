//! Sessions in the `sessions` table.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio_util::task::TaskTracker;
use tracing::instrument;

use super::{SessionStore, drain};
use crate::auth::session::{self, Session};
use crate::db::errors::{DbError, Result as DbResult};
use crate::db::handlers::Sessions;
use crate::db::handlers::sessions::SessionUpsertDBRequest;
use crate::db::models::sessions::SessionRecord;
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_secret, abbrev_uuid};

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    tasks: TaskTracker,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tasks: TaskTracker::new(),
        }
    }

    /// Remove every record whose expiry has passed. Returns how many were removed.
    #[instrument(skip(self), err)]
    pub async fn delete_expired(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(Sessions::new(&mut conn).delete_expired().await?)
    }

    async fn conn(&self) -> Result<PoolConnection<Postgres>> {
        Ok(self.pool.acquire().await.map_err(DbError::from)?)
    }

    fn decode(record: &SessionRecord) -> Result<Session> {
        Ok(session::decode(&record.id, &record.payload)?)
    }

    fn purge_in_background(&self, id: String) {
        let pool = self.pool.clone();
        self.tasks.spawn(async move {
            let result: DbResult<bool> = async {
                let mut conn = pool.acquire().await?;
                Sessions::new(&mut conn).delete(&id).await
            }
            .await;
            match result {
                Ok(_) => tracing::debug!(session = %abbrev_secret(&id), "purged expired session record"),
                Err(e) => tracing::warn!(session = %abbrev_secret(&id), error = %e, "failed to purge expired session record"),
            }
        });
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip_all, err(level = "debug"))]
    async fn get(&self, id: &str) -> Result<Session> {
        let mut conn = self.conn().await?;
        let record = Sessions::new(&mut conn).get(id).await?.ok_or(Error::SessionNotFound)?;

        let session = Self::decode(&record)?;
        if session.expired() {
            self.purge_in_background(record.id);
            return Err(Error::SessionExpired);
        }

        Ok(session)
    }

    #[instrument(skip_all, fields(user_id = ?session.user_id().as_ref().map(abbrev_uuid), counter = session.counter), err)]
    async fn put(&self, session: &Session) -> Result<()> {
        if session.expired() {
            return Err(Error::SessionExpired);
        }
        let payload = session::encode(session)?;

        let mut conn = self.conn().await?;
        let written = Sessions::new(&mut conn)
            .upsert(&SessionUpsertDBRequest {
                id: &session.id,
                user_id: session.user_id(),
                user_agent: &session.user_agent,
                ip: &session.ip,
                payload: &payload,
                expires_at: session.expires_at,
            })
            .await?;

        if !written {
            tracing::debug!("kept newer durable copy of session");
        }
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn delete(&self, session: &Session) -> Result<()> {
        let mut conn = self.conn().await?;
        Sessions::new(&mut conn).delete(&session.id).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn by_user_id(&self, user_id: UserId) -> Result<Vec<Session>> {
        let mut conn = self.conn().await?;
        let records = Sessions::new(&mut conn).for_user(user_id).await?;

        let mut sessions = Vec::with_capacity(records.len());
        for record in &records {
            match Self::decode(record) {
                // The row may have expired between the query and now
                Ok(session) if session.expired() => {}
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable session record"),
            }
        }

        Ok(sessions)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(Sessions::new(&mut conn).delete_for_user(user_id).await?)
    }

    async fn flush(&self) {
        drain(&self.tasks).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_user;
    use chrono::{TimeDelta, Utc};
    use std::time::Duration;

    fn session_for(user: &crate::db::models::users::User, ttl: Duration) -> Session {
        Session::for_user(user, &[], Default::default(), ttl).with_client("test-agent", "127.0.0.1")
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_save_get_round_trip(pool: PgPool) {
        let user = create_test_user(&pool, "pg-store@example.com").await;
        let store = PgSessionStore::new(pool.clone());

        let mut session = session_for(&user, Duration::from_secs(600));
        session.set("theme", serde_json::json!({"mode": "dark", "size": 1.5}));
        session.flash("info", "hello");
        store.save(&mut session).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap();
        assert_eq!(loaded, session);

        let ua: String = sqlx::query_scalar("SELECT user_agent FROM sessions WHERE id = $1")
            .bind(&session.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(ua, "test-agent");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_older_write_does_not_overwrite_newer(pool: PgPool) {
        let user = create_test_user(&pool, "ordering@example.com").await;
        let store = PgSessionStore::new(pool.clone());

        let mut session = session_for(&user, Duration::from_secs(600));
        store.save(&mut session).await.unwrap();
        let older = session.clone();

        session.set("step", serde_json::json!(2));
        store.save(&mut session).await.unwrap();

        // A delayed write of the first save arrives late
        store.put(&older).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap();
        assert_eq!(loaded.counter, 2);
        assert_eq!(loaded.get("step"), Some(&serde_json::json!(2)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_record_is_hidden_and_purged(pool: PgPool) {
        let user = create_test_user(&pool, "expired@example.com").await;
        let store = PgSessionStore::new(pool.clone());

        let mut session = session_for(&user, Duration::from_secs(600));
        store.save(&mut session).await.unwrap();
        sqlx::query("UPDATE sessions SET payload = jsonb_set(payload, '{expires_at}', to_jsonb($2::text)) WHERE id = $1")
            .bind(&session.id)
            .bind((Utc::now() - TimeDelta::seconds(5)).to_rfc3339())
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(store.get(&session.id).await, Err(Error::SessionExpired)));
        store.flush().await;
        assert!(matches!(store.get(&session.id).await, Err(Error::SessionNotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_by_user_and_delete_by_user(pool: PgPool) {
        let user = create_test_user(&pool, "many@example.com").await;
        let other = create_test_user(&pool, "other@example.com").await;
        let store = PgSessionStore::new(pool.clone());

        for _ in 0..3 {
            store.save(&mut session_for(&user, Duration::from_secs(600))).await.unwrap();
        }
        let mut kept = session_for(&other, Duration::from_secs(600));
        store.save(&mut kept).await.unwrap();

        assert_eq!(store.by_user_id(user.id).await.unwrap().len(), 3);
        assert_eq!(store.delete_by_user_id(user.id).await.unwrap(), 3);
        assert!(store.by_user_id(user.id).await.unwrap().is_empty());
        assert!(store.get(&kept.id).await.is_ok());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_expired_sweeps_only_expired(pool: PgPool) {
        let user = create_test_user(&pool, "sweep@example.com").await;
        let store = PgSessionStore::new(pool.clone());

        let mut live = session_for(&user, Duration::from_secs(600));
        let mut dead = session_for(&user, Duration::from_secs(600));
        store.save(&mut live).await.unwrap();
        store.save(&mut dead).await.unwrap();
        sqlx::query("UPDATE sessions SET expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
            .bind(&dead.id)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert!(store.get(&live.id).await.is_ok());
        assert!(matches!(store.get(&dead.id).await, Err(Error::SessionNotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_deleting_user_cascades_to_sessions(pool: PgPool) {
        let user = create_test_user(&pool, "cascade-sessions@example.com").await;
        let store = PgSessionStore::new(pool.clone());

        let mut session = session_for(&user, Duration::from_secs(600));
        store.save(&mut session).await.unwrap();

        sqlx::query("DELETE FROM users WHERE id = $1").bind(user.id).execute(&pool).await.unwrap();
        assert!(matches!(store.get(&session.id).await, Err(Error::SessionNotFound)));
    }
}
