//! Volatile key-value cache.
//!
//! The [`Cache`] trait is the protocol the session store and the rate limiter speak: string values
//! with optional time-to-live, an atomic increment, expire, delete and string sets. Anything that
//! can offer these operations with per-key atomicity can back the crate; [`MemoryCache`] is the
//! in-process implementation.
//!
//! # Semantics
//!
//! - A key whose time-to-live has elapsed is indistinguishable from a missing key.
//! - `incr` creates a missing key at 1 with no expiry and is atomic per key.
//! - `expire` only applies to an existing key and overwrites any previous expiry.
//! - Values and sets share the key space; using a set operation on a string (or the other way
//!   round) is a [`CacheError::WrongType`].

use std::time::Duration;

use thiserror::Error;

pub mod memory;

pub use memory::MemoryCache;

/// Errors raised by cache backends.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key holds a value of a different kind than the operation expects
    #[error("value at key {key} has the wrong type for this operation")]
    WrongType { key: String },

    /// The stored value could not be interpreted
    #[error("value at key {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// Backend failure (connection loss, protocol error)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (or has already expired)
    Missing,
    /// The key exists and never expires
    Persistent,
    /// The key exists and expires after this duration
    Remaining(Duration),
}

impl KeyTtl {
    /// Remaining duration, or zero when the key is missing or persistent.
    pub fn remaining(self) -> Duration {
        match self {
            KeyTtl::Remaining(d) => d,
            KeyTtl::Missing | KeyTtl::Persistent => Duration::ZERO,
        }
    }
}

/// Operations a volatile cache must provide.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Get a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value, replacing whatever the key held. `None` stores without expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Atomically increment an integer value, returning the new value
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set the expiry of an existing key. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Add a member to a set, returning true if it was not already present
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove a member from a set, returning true if it was present
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of a set; a missing key is an empty set
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}
