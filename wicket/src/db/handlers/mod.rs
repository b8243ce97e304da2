//! Repository implementations for database access.
//!
//! This module provides repository structs for each major entity in the system.
//! Repositories follow a consistent pattern; the ones with a full CRUD surface implement the
//! [`Repository`] trait.
//!
//! # Design Pattern
//!
//! Each repository:
//! - Wraps a SQLx connection or transaction
//! - Provides strongly-typed operations
//! - Handles query construction and parameter binding
//! - Returns domain models from [`crate::db::models`]
//!
//! # Available Repositories
//!
//! - [`Users`]: User accounts and credentials
//! - [`Groups`]: Group definitions and user memberships
//! - [`Permissions`]: The permission catalog
//! - [`GroupPermissions`]: Per-group permission overrides
//! - [`OneTimeTokens`]: Registration and password reset tokens
//! - [`Sessions`]: Durable session records
//!
//! # Common Pattern
//!
//! ```ignore
//! use wicket::db::handlers::{Users, Repository};
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!     let mut repo = Users::new(&mut tx);
//!
//!     let user = repo.get_user_by_email("alice@example.com").await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod group_permissions;
pub mod groups;
pub mod permissions;
pub mod repository;
pub mod sessions;
pub mod tokens;
pub mod users;

pub use group_permissions::GroupPermissions;
pub use groups::Groups;
pub use permissions::Permissions;
pub use repository::Repository;
pub use sessions::Sessions;
pub use tokens::OneTimeTokens;
pub use users::Users;
