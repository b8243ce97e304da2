//! # wicket: authentication, sessions and permissions for server applications
//!
//! `wicket` is the authentication core of a web application. It verifies credentials, keeps user
//! sessions in a fast volatile cache backed by PostgreSQL, throttles login and password reset
//! attempts, and resolves what a user may do from the groups they belong to.
//!
//! ## Overview
//!
//! A user logs in with an email and a password. Passwords are stored as Argon2id hashes. Every
//! attempt is counted against a fixed-window limit keyed by the email, so a burst of guesses is
//! cut off until the window closes. A successful login produces a [`Session`](auth::Session):
//! an opaque random id carrying the user, their groups, their effective permissions and any
//! metadata or flash message the application attaches.
//!
//! Sessions live in two places. The volatile cache serves every read. The `sessions` table keeps
//! a durable copy written either before `save` returns or in a tracked background task, so a
//! cache restart does not log everybody out. Deleting a session always reaches both stores.
//!
//! Permissions are named values with a catalog default. A group may override a permission, and
//! when several of a user's groups do, the group with the highest priority wins.
//!
//! ## Architecture
//!
//! - [`auth`]: [`AuthService`](auth::AuthService) and everything it orchestrates
//! - [`cache`]: the volatile cache protocol and its in-process implementation
//! - [`limits`]: the fixed-window rate limiter
//! - [`db`]: repositories over PostgreSQL, see also [`migrator`]
//! - [`config`], [`telemetry`], [`errors`], [`maintenance`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use wicket::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = wicket::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     wicket::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     let service = app.auth_service().clone();
//!     // hand `service` to the request handlers...
//!
//!     app.run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations are embedded and run by [`Application::new`]. To run them yourself:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! wicket::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod limits;
pub mod maintenance;
pub mod telemetry;
mod types;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::AuthService;
use crate::cache::MemoryCache;

pub use config::Config;
pub use types::{GroupId, PermissionId, UserId};

/// Get the wicket database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to the configured database and bring its schema up to date.
pub async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database_url()
        .context("no database url configured (set DATABASE_URL or database.url)")?;

    let pool = config.database.pool.pool_options().connect(url).await?;
    migrator().run(&pool).await?;
    info!("Database ready");

    Ok(pool)
}

/// The wired-up service plus its background maintenance.
pub struct Application {
    config: Config,
    pool: PgPool,
    cache: Arc<MemoryCache>,
    service: AuthService,
}

impl Application {
    /// Connect, migrate and build the [`AuthService`] over an in-process cache.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting with configuration: {:#?}", config);
        let pool = setup_database(&config).await?;
        Ok(Self::new_with_pool(config, pool))
    }

    /// Build the application over an existing, already migrated pool.
    pub fn new_with_pool(config: Config, pool: PgPool) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let service = AuthService::new(pool.clone(), cache.clone(), &config);
        Self {
            config,
            pool,
            cache,
            service,
        }
    }

    pub fn auth_service(&self) -> &AuthService {
        &self.service
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run background maintenance until `shutdown` resolves, then flush pending session writes and
    /// close the pool.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown_token = CancellationToken::new();

        let db_token = shutdown_token.clone();
        let db_sweeper = tokio::spawn(maintenance::run_database_sweeper(
            self.pool.clone(),
            self.config.maintenance.sweep_interval,
            async move { db_token.cancelled().await },
        ));

        let cache_token = shutdown_token.clone();
        let cache_sweeper = tokio::spawn(maintenance::run_cache_sweeper(
            self.cache.clone(),
            self.config.maintenance.cache_sweep_interval,
            async move { cache_token.cancelled().await },
        ));

        shutdown.await;
        shutdown_token.cancel();

        if let Err(e) = db_sweeper.await {
            tracing::error!("Expired record sweeper task failed: {}", e);
        }
        if let Err(e) = cache_sweeper.await {
            tracing::error!("Cache sweeper task failed: {}", e);
        }

        info!("Flushing pending session writes...");
        self.service.sessions().flush().await;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ClientInfo;
    use crate::test_utils::test_config;

    #[sqlx::test]
    #[test_log::test]
    async fn test_application_runs_and_shuts_down(pool: PgPool) {
        let app = Application::new_with_pool(test_config(), pool.clone());

        let session = app
            .auth_service()
            .anonymous_session(ClientInfo::new("test", "127.0.0.1"))
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), app.run(async {}))
            .await
            .expect("application did not shut down")
            .unwrap();

        assert!(pool.is_closed());
        assert!(!session.id.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_application_sweeps_expired_cache_keys(pool: PgPool) {
        use crate::cache::Cache;
        use std::time::Duration;

        let mut config = test_config();
        config.maintenance.cache_sweep_interval = Duration::from_millis(10);
        let app = Application::new_with_pool(config, pool);
        let cache = app.cache.clone();

        for i in 0..100 {
            cache
                .set(&format!("short:{i}"), "x".to_string(), Some(Duration::from_millis(5)))
                .await
                .unwrap();
        }
        cache.set("kept", "x".to_string(), None).await.unwrap();
        assert_eq!(cache.len(), 101);

        tokio::time::timeout(
            Duration::from_secs(5),
            app.run(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .expect("application did not shut down")
        .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("kept").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_setup_database_requires_url() {
        let err = setup_database(&Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("no database url"));
    }
}
