//! Session persistence.
//!
//! [`SessionStore`] is the one interface the rest of the crate talks to. There are three
//! implementations, chosen when the service is built:
//!
//! - [`CacheSessionStore`]: the volatile cache. Entries expire with the session, and a set per
//!   user indexes the user's session ids.
//! - [`PgSessionStore`]: the `sessions` table. Authoritative for a user's sessions and the
//!   fallback when the cache has lost an entry.
//! - [`TieredSessionStore`]: a primary store in front of a durable one, with a configurable
//!   [`Durability`] for the durable write.
//!
//! A session read after its expiry is never handed out. Stores answer
//! [`Error::SessionExpired`] and purge the record in a tracked background task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;

use crate::auth::session::{Session, generate_session_id};
use crate::errors::{Error, Result};
use crate::types::UserId;

pub mod cache;
pub mod postgres;
pub mod tiered;

pub use cache::CacheSessionStore;
pub use postgres::PgSessionStore;
pub use tiered::TieredSessionStore;

/// When the durable copy of a session is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// `save` returns once both stores have been written
    Synchronous,
    /// `save` returns after the primary write; the durable write runs in a tracked task
    #[default]
    Background,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a live session. Fails with [`Error::SessionNotFound`] or [`Error::SessionExpired`].
    async fn get(&self, id: &str) -> Result<Session>;

    /// Write the session exactly as given. Callers normally want [`SessionStore::save`].
    async fn put(&self, session: &Session) -> Result<()>;

    /// Assign an id if the session has none, bump its save counter and write it.
    async fn save(&self, session: &mut Session) -> Result<()> {
        prepare_save(session)?;
        self.put(session).await
    }

    async fn delete(&self, session: &Session) -> Result<()>;

    /// Live sessions of a user. Ids that turn out to be gone are skipped.
    async fn by_user_id(&self, user_id: UserId) -> Result<Vec<Session>>;

    /// Delete every session of a user, returning how many were removed.
    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64>;

    /// Wait for background work (purges, deferred writes) started so far.
    async fn flush(&self) {}
}

pub(crate) fn prepare_save(session: &mut Session) -> Result<()> {
    if session.expired() {
        return Err(Error::SessionExpired);
    }
    if session.id.is_empty() {
        session.id = generate_session_id();
    }
    session.counter += 1;
    Ok(())
}

/// Wait for every task spawned on `tracker` so far, then accept new ones again.
pub(crate) async fn drain(tracker: &TaskTracker) {
    tracker.close();
    tracker.wait().await;
    tracker.reopen();
}
