//! Periodic cleanup of expired state.
//!
//! Cache entries and rows in `sessions`, `registration_tokens` and `pass_tokens` are only removed
//! on access once they expire. The sweepers here remove the ones nobody touches again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::MissedTickBehavior;

use crate::auth::session_store::PgSessionStore;
use crate::cache::MemoryCache;
use crate::db::handlers::OneTimeTokens;
use crate::db::models::tokens::TokenKind;
use crate::errors::{Error, Result};

/// Rows removed by one database sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub registration_tokens: u64,
    pub password_reset_tokens: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.sessions + self.registration_tokens + self.password_reset_tokens
    }
}

/// Delete expired session records and one-time tokens.
pub async fn sweep_expired(pool: &PgPool) -> Result<SweepReport> {
    let sessions = PgSessionStore::new(pool.clone()).delete_expired().await?;

    let mut conn = pool.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let registration_tokens = OneTimeTokens::new(&mut conn, TokenKind::Registration)
        .delete_expired()
        .await?;
    let password_reset_tokens = OneTimeTokens::new(&mut conn, TokenKind::PasswordReset)
        .delete_expired()
        .await?;

    Ok(SweepReport {
        sessions,
        registration_tokens,
        password_reset_tokens,
    })
}

/// Run [`sweep_expired`] every `interval` until `shutdown` resolves. The first sweep runs
/// immediately.
pub async fn run_database_sweeper<F>(pool: PgPool, interval: Duration, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    tracing::info!(interval = ?interval, "Starting expired record sweeper");

    let pool = &pool;
    every(interval, shutdown, move || async move {
        match sweep_expired(pool).await {
            Ok(report) if report.total() == 0 => tracing::trace!("no expired records"),
            Ok(report) => tracing::info!(
                sessions = report.sessions,
                registration_tokens = report.registration_tokens,
                password_reset_tokens = report.password_reset_tokens,
                "deleted expired records"
            ),
            Err(e) => tracing::error!(error = %e, "expired record sweep failed"),
        }
    })
    .await;

    tracing::info!("Expired record sweeper shutting down");
}

/// Drop expired keys from `cache` every `interval` until `shutdown` resolves.
pub async fn run_cache_sweeper<F>(cache: Arc<MemoryCache>, interval: Duration, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    tracing::info!(interval = ?interval, "Starting cache sweeper");

    let cache = &cache;
    every(interval, shutdown, move || async move {
        match cache.purge_expired() {
            0 => tracing::trace!("no expired cache keys"),
            purged => tracing::debug!(purged, remaining = cache.len(), "purged expired cache keys"),
        }
    })
    .await;

    tracing::info!("Cache sweeper shutting down");
}

async fn every<F, T, Fut>(interval: Duration, shutdown: F, mut tick: T)
where
    F: Future<Output = ()> + Send,
    T: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => tick().await,
        }
    }
}
