//! In-process [`Cache`] implementation.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{Cache, CacheError, KeyTtl, Result};

#[derive(Debug)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cache held in a sharded concurrent map.
///
/// Every mutation of a key happens under that key's shard lock, which is what makes `incr` atomic
/// across concurrent callers. Expired keys are dropped lazily when touched and in bulk by
/// [`MemoryCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired key, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of keys currently held, including expired keys not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Must not be called while holding a guard into the map.
    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        self.evict_if_expired(key, now);

        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::Set(_) => Err(CacheError::WrongType { key: key.to_string() }),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            self.entries.remove(key);
            return Ok(());
        }

        let now = Instant::now();
        self.entries.insert(key.to_string(), Entry::new(Value::Str(value), ttl, now));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key)
                && !entry.is_expired(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Str("0".to_string()), None, now));

        if entry.is_expired(now) {
            *entry = Entry::new(Value::Str("0".to_string()), None, now);
        }

        match &mut entry.value {
            Value::Str(s) => {
                let current: i64 = s.parse().map_err(|e| CacheError::Corrupt {
                    key: key.to_string(),
                    reason: format!("not an integer: {e}"),
                })?;
                let next = current + 1;
                *s = next.to_string();
                Ok(next)
            }
            Value::Set(_) => Err(CacheError::WrongType { key: key.to_string() }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        self.evict_if_expired(key, now);

        if ttl.is_zero() {
            return Ok(self.entries.remove(key).is_some());
        }

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = Instant::now();
        self.evict_if_expired(key, now);

        Ok(match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match entry.expires_at {
                Some(at) => KeyTtl::Remaining(at.saturating_duration_since(now)),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new()), None, now));

        if entry.is_expired(now) {
            *entry = Entry::new(Value::Set(HashSet::new()), None, now);
        }

        match &mut entry.value {
            Value::Set(members) => Ok(members.insert(member.to_string())),
            Value::Str(_) => Err(CacheError::WrongType { key: key.to_string() }),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let now = Instant::now();
        self.evict_if_expired(key, now);

        let (removed, now_empty) = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => match &mut entry.value {
                Value::Set(members) => {
                    let removed = members.remove(member);
                    (removed, members.is_empty())
                }
                Value::Str(_) => return Err(CacheError::WrongType { key: key.to_string() }),
            },
            _ => return Ok(false),
        };

        // Empty sets do not exist
        if now_empty {
            self.entries
                .remove_if(key, |_, entry| matches!(&entry.value, Value::Set(members) if members.is_empty()));
        }

        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        self.evict_if_expired(key, now);

        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Set(members) => Ok(members.iter().cloned().collect()),
                Value::Str(_) => Err(CacheError::WrongType { key: key.to_string() }),
            },
            _ => Ok(Vec::new()),
        }
    }
}
