//! Database record models matching table schemas.
//!
//! This module contains struct definitions that directly correspond to database
//! table rows. These models are used by repositories to return query results
//! and accept insertion/update data.
//!
//! # Design Principles
//!
//! - **Schema Mapping**: Each model struct matches a database table schema
//! - **SQLx Integration**: Models derive `sqlx::FromRow` for query results
//! - **Type Safety**: Uses type aliases for IDs (UserId, GroupId, etc.)
//!
//! # Model Categories
//!
//! - [`users`]: User accounts and credentials
//! - [`groups`]: Group definitions, ordered by priority
//! - [`permissions`]: Permission catalog and per-group overrides
//! - [`tokens`]: Registration confirmation and password reset tokens
//! - [`sessions`]: Durable session records

pub mod groups;
pub mod permissions;
pub mod sessions;
pub mod tokens;
pub mod users;
