//! Sessions in the volatile cache.
//!
//! Layout under the configured prefix (default `session`):
//!
//! - `<prefix>:<id>`: the encoded session, expiring with the session
//! - `<prefix>:user:<user id>`: set of the user's session ids, kept alive as long as the
//!   longest-lived session it lists
//!
//! The index may list ids whose entry has already expired. Enumeration treats those as gone and
//! drops them from the set.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use super::{SessionStore, drain};
use crate::auth::session::{self, Session};
use crate::cache::{Cache, KeyTtl};
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_secret, abbrev_uuid};

#[derive(Clone)]
pub struct CacheSessionStore {
    cache: Arc<dyn Cache>,
    prefix: Arc<str>,
    tasks: TaskTracker,
}

impl CacheSessionStore {
    pub fn new(cache: Arc<dyn Cache>, prefix: impl Into<Arc<str>>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            tasks: TaskTracker::new(),
        }
    }

    fn session_key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn user_key(&self, user_id: UserId) -> String {
        format!("{}:user:{}", self.prefix, user_id)
    }

    async fn remove(&self, id: &str, user_id: Option<UserId>) -> Result<()> {
        self.cache.delete(&[self.session_key(id)]).await?;
        if let Some(user_id) = user_id {
            self.cache.srem(&self.user_key(user_id), id).await?;
        }
        Ok(())
    }

    fn purge_in_background(&self, id: String, user_id: Option<UserId>) {
        let store = self.clone();
        self.tasks.spawn(async move {
            match store.remove(&id, user_id).await {
                Ok(()) => tracing::debug!(session = %abbrev_secret(&id), "purged expired session from cache"),
                Err(e) => tracing::warn!(session = %abbrev_secret(&id), error = %e, "failed to purge expired session from cache"),
            }
        });
    }
}

#[async_trait]
impl SessionStore for CacheSessionStore {
    #[instrument(skip_all, err(level = "debug"))]
    async fn get(&self, id: &str) -> Result<Session> {
        let key = self.session_key(id);
        let Some(payload) = self.cache.get(&key).await? else {
            return Err(Error::SessionNotFound);
        };

        let session = session::decode(&key, &payload)?;
        if session.expired() {
            self.purge_in_background(session.id.clone(), session.user_id());
            return Err(Error::SessionExpired);
        }

        Ok(session)
    }

    #[instrument(skip_all, fields(user_id = ?session.user_id().as_ref().map(abbrev_uuid), counter = session.counter), err)]
    async fn put(&self, session: &Session) -> Result<()> {
        let ttl = session.time_to_live().ok_or(Error::SessionExpired)?;
        let payload = session::encode(session)?;

        self.cache.set(&self.session_key(&session.id), payload, Some(ttl)).await?;

        if let Some(user_id) = session.user_id() {
            let index = self.user_key(user_id);
            self.cache.sadd(&index, &session.id).await?;

            // The index must outlive every session it lists
            match self.cache.ttl(&index).await? {
                KeyTtl::Remaining(remaining) if remaining >= ttl => {}
                _ => {
                    self.cache.expire(&index, ttl).await?;
                }
            }
        }

        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn delete(&self, session: &Session) -> Result<()> {
        self.remove(&session.id, session.user_id()).await
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn by_user_id(&self, user_id: UserId) -> Result<Vec<Session>> {
        let index = self.user_key(user_id);
        let ids = self.cache.smembers(&index).await?;

        let lookups = ids.iter().map(|id| self.get(id));
        let results = join_all(lookups).await;

        let mut sessions = Vec::with_capacity(ids.len());
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(session) => sessions.push(session),
                Err(Error::SessionNotFound | Error::SessionExpired) => {
                    self.cache.srem(&index, id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(sessions)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64> {
        let index = self.user_key(user_id);
        let mut keys: Vec<String> = self
            .cache
            .smembers(&index)
            .await?
            .iter()
            .map(|id| self.session_key(id))
            .collect();

        let sessions = if keys.is_empty() { 0 } else { self.cache.delete(&keys).await? };
        keys.clear();
        keys.push(index);
        self.cache.delete(&keys).await?;

        Ok(sessions)
    }

    async fn flush(&self) {
        drain(&self.tasks).await;
    }
}
