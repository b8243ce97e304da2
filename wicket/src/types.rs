//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases for better readability:
//!
//! - [`UserId`]: User account identifier
//! - [`GroupId`]: Group identifier
//! - [`PermissionId`]: Permission identifier
//!
//! Session ids are not UUIDs: they are opaque hex strings, see [`crate::auth::session`].
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging
//! - [`abbrev_secret`]: Abbreviate session ids and other secrets for logging

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type GroupId = Uuid;
pub type PermissionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Abbreviate a secret (session id, token) so it can be correlated in logs without being usable.
pub fn abbrev_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{prefix}…")
}
