//! Database layer for durable data.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//! It follows the Repository pattern to provide clean abstractions over database operations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ AuthService │  (auth flows, session store)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Transactions
//!
//! Repositories borrow a `PgConnection`, so they work the same on a pooled connection and inside
//! a transaction. Multi-step writes take a transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let user = Users::new(&mut tx).create(&request).await?;
//! OneTimeTokens::new(&mut tx, TokenKind::Registration)
//!     .replace_for_user(user.id, &digest, &user.email, expires_at)
//!     .await?;
//! tx.commit().await?;
//! ```
//!
//! A transaction that is dropped before `commit` rolls back.
//!
//! # Migrations
//!
//! Migrations are managed by SQLx and located in the `migrations/` directory.
//! The [`crate::migrator`] function provides access to the migrator:
//!
//! ```ignore
//! wicket::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
