//! A fast primary store in front of a durable one.
//!
//! Reads go to the primary. On a primary miss the durable copy is consulted (when
//! `recover_from_durable` is set) and written back to the primary. Writes go to the primary first
//! and then to the durable store, synchronously or in a tracked background task depending on
//! [`Durability`]. Deletes always reach both stores before returning, so a logged-out session
//! cannot be recovered from a lagging durable copy.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use super::{Durability, SessionStore, drain};
use crate::auth::session::Session;
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_uuid};

pub struct TieredSessionStore {
    primary: Arc<dyn SessionStore>,
    durable: Arc<dyn SessionStore>,
    durability: Durability,
    recover_from_durable: bool,
    tasks: TaskTracker,
}

impl TieredSessionStore {
    pub fn new(primary: Arc<dyn SessionStore>, durable: Arc<dyn SessionStore>, durability: Durability) -> Self {
        Self {
            primary,
            durable,
            durability,
            recover_from_durable: true,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_recovery(mut self, recover_from_durable: bool) -> Self {
        self.recover_from_durable = recover_from_durable;
        self
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    async fn recover(&self, id: &str) -> Result<Session> {
        let session = self.durable.get(id).await?;

        if let Err(e) = self.primary.put(&session).await {
            tracing::warn!(error = %e, "failed to re-warm primary session store");
        } else {
            tracing::debug!("recovered session from durable store");
        }

        Ok(session)
    }
}

#[async_trait]
impl SessionStore for TieredSessionStore {
    #[instrument(skip_all, err(level = "debug"))]
    async fn get(&self, id: &str) -> Result<Session> {
        match self.primary.get(id).await {
            Ok(session) => Ok(session),
            Err(Error::SessionExpired) => {
                // The primary purges its own copy; reading the durable one triggers its purge too
                let durable = self.durable.clone();
                let id = id.to_string();
                self.tasks.spawn(async move {
                    match durable.get(&id).await {
                        Ok(_) | Err(Error::SessionExpired | Error::SessionNotFound) => {}
                        Err(e) => tracing::warn!(error = %e, "failed to check durable copy of expired session"),
                    }
                });
                Err(Error::SessionExpired)
            }
            Err(Error::SessionNotFound) if self.recover_from_durable => self.recover(id).await,
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all, fields(user_id = ?session.user_id().as_ref().map(abbrev_uuid), durability = ?self.durability), err)]
    async fn put(&self, session: &Session) -> Result<()> {
        self.primary.put(session).await?;

        match self.durability {
            Durability::Synchronous => self.durable.put(session).await,
            Durability::Background => {
                let durable = self.durable.clone();
                let session = session.clone();
                self.tasks.spawn(async move {
                    if let Err(e) = durable.put(&session).await {
                        tracing::warn!(error = %e, counter = session.counter, "background durable session write failed");
                    }
                });
                Ok(())
            }
        }
    }

    #[instrument(skip_all, err)]
    async fn delete(&self, session: &Session) -> Result<()> {
        // A deferred durable write of this session must not land after the delete
        drain(&self.tasks).await;

        self.primary.delete(session).await?;
        self.durable.delete(session).await
    }

    /// Union of both stores, preferring the primary's copy of a session.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn by_user_id(&self, user_id: UserId) -> Result<Vec<Session>> {
        let (primary, durable) = tokio::join!(self.primary.by_user_id(user_id), self.durable.by_user_id(user_id));

        let mut sessions = primary?;
        let mut seen: HashSet<String> = sessions.iter().map(|s| s.id.clone()).collect();
        for session in durable? {
            if seen.insert(session.id.clone()) {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64> {
        // Pending background writes could otherwise recreate durable rows afterwards
        drain(&self.tasks).await;

        let primary = self.primary.delete_by_user_id(user_id).await?;
        let durable = self.durable.delete_by_user_id(user_id).await?;
        Ok(primary.max(durable))
    }

    async fn flush(&self) {
        drain(&self.tasks).await;
        self.primary.flush().await;
        self.durable.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionUser;
    use crate::auth::session_store::CacheSessionStore;
    use crate::cache::{Cache, MemoryCache};
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        store: TieredSessionStore,
        primary_cache: Arc<MemoryCache>,
        durable: Arc<CacheSessionStore>,
    }

    fn fixture(durability: Durability) -> Fixture {
        let primary_cache = Arc::new(MemoryCache::new());
        let primary = Arc::new(CacheSessionStore::new(primary_cache.clone(), "session"));
        let durable = Arc::new(CacheSessionStore::new(Arc::new(MemoryCache::new()), "durable"));
        Fixture {
            store: TieredSessionStore::new(primary, durable.clone(), durability),
            primary_cache,
            durable,
        }
    }

    fn user_session(user_id: UserId) -> Session {
        let mut session = Session::new(Duration::from_secs(300));
        session.user = Some(SessionUser {
            id: user_id,
            name: "Alice".to_string(),
            email: "a@b.com".to_string(),
            confirmed_at: None,
        });
        session
    }

    #[tokio::test]
    async fn test_synchronous_write_reaches_durable_before_return() {
        let f = fixture(Durability::Synchronous);
        let mut session = Session::new(Duration::from_secs(60));

        f.store.save(&mut session).await.unwrap();
        assert_eq!(f.durable.get(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_background_write_lands_after_flush() {
        let f = fixture(Durability::Background);
        let mut session = Session::new(Duration::from_secs(60));

        f.store.save(&mut session).await.unwrap();
        // Readable from the primary straight away
        assert_eq!(f.store.get(&session.id).await.unwrap().counter, 1);

        f.store.flush().await;
        assert_eq!(f.durable.get(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_primary_miss_recovers_and_rewarms() {
        let f = fixture(Durability::Synchronous);
        let mut session = Session::new(Duration::from_secs(60));
        f.store.save(&mut session).await.unwrap();

        // Primary lost the entry
        f.primary_cache.delete(&[format!("session:{}", session.id)]).await.unwrap();

        assert_eq!(f.store.get(&session.id).await.unwrap(), session);
        assert!(f.primary_cache.get(&format!("session:{}", session.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recovery_can_be_disabled() {
        let primary_cache = Arc::new(MemoryCache::new());
        let primary = Arc::new(CacheSessionStore::new(primary_cache.clone(), "session"));
        let durable = Arc::new(CacheSessionStore::new(Arc::new(MemoryCache::new()), "durable"));
        let store = TieredSessionStore::new(primary, durable, Durability::Synchronous).with_recovery(false);

        let mut session = Session::new(Duration::from_secs(60));
        store.save(&mut session).await.unwrap();
        primary_cache.delete(&[format!("session:{}", session.id)]).await.unwrap();

        assert!(matches!(store.get(&session.id).await, Err(Error::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_delete_reaches_both_stores() {
        let f = fixture(Durability::Background);
        let mut session = Session::new(Duration::from_secs(60));
        f.store.save(&mut session).await.unwrap();
        f.store.flush().await;

        f.store.delete(&session).await.unwrap();
        assert!(matches!(f.durable.get(&session.id).await, Err(Error::SessionNotFound)));
        assert!(matches!(f.store.get(&session.id).await, Err(Error::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_delete_right_after_background_save_is_final() {
        let f = fixture(Durability::Background);
        let mut session = Session::new(Duration::from_secs(60));

        // The durable write is still pending when the delete arrives
        f.store.save(&mut session).await.unwrap();
        f.store.delete(&session).await.unwrap();
        f.store.flush().await;

        assert!(matches!(f.durable.get(&session.id).await, Err(Error::SessionNotFound)));
        assert!(matches!(f.store.get(&session.id).await, Err(Error::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_by_user_id_merges_stores() {
        let f = fixture(Durability::Synchronous);
        let user_id = Uuid::new_v4();

        let mut a = user_session(user_id);
        let mut b = user_session(user_id);
        f.store.save(&mut a).await.unwrap();
        f.store.save(&mut b).await.unwrap();

        // Only the durable store still knows about `a`
        f.primary_cache.delete(&[format!("session:{}", a.id)]).await.unwrap();

        let mut ids: Vec<_> = f.store.by_user_id(user_id).await.unwrap().into_iter().map(|s| s.id).collect();
        ids.sort();
        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_delete_by_user_id_waits_for_pending_writes() {
        let f = fixture(Durability::Background);
        let user_id = Uuid::new_v4();

        for _ in 0..3 {
            f.store.save(&mut user_session(user_id)).await.unwrap();
        }

        assert_eq!(f.store.delete_by_user_id(user_id).await.unwrap(), 3);
        f.store.flush().await;
        assert!(f.durable.by_user_id(user_id).await.unwrap().is_empty());
        assert!(f.store.by_user_id(user_id).await.unwrap().is_empty());
    }
}
