//! The session entity and its payload codec.
//!
//! A [`Session`] carries everything a request needs to authorize a user without going back to the
//! database: a summary of the user, their groups and their resolved permissions. It is created
//! anonymous or for a user at login and is mutated in place by callers, who persist changes with
//! an explicit [`SessionStore::save`](crate::auth::session_store::SessionStore::save).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::prelude::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};

use crate::auth::permissions::Permissions;
use crate::cache::CacheError;
use crate::db::models::groups::Group;
use crate::db::models::users::User;
use crate::types::{GroupId, UserId};

/// Current payload format version
const PAYLOAD_VERSION: u32 = 1;

/// Length in bytes of the random part of a session id
const SESSION_ID_BYTES: usize = 32;

/// Generate a session id: 32 bytes from the OS-seeded CSPRNG, lower-case hex.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// `now + ttl`, saturating at the largest representable time.
pub(crate) fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The parts of a user a session needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            confirmed_at: user.confirmed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGroup {
    pub id: GroupId,
    pub name: String,
    pub priority: i32,
}

impl From<&Group> for SessionGroup {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id,
            name: group.name.clone(),
            priority: group.priority,
        }
    }
}

/// A one-shot message for the next page the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Number of times the session has been saved
    pub counter: u64,
    /// `None` for an anonymous session
    pub user: Option<SessionUser>,
    pub groups: Vec<SessionGroup>,
    pub permissions: Permissions,
    pub user_agent: String,
    pub ip: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub flash: Option<Flash>,
    pub meta: HashMap<String, serde_json::Value>,
}

impl Session {
    /// A fresh anonymous session that expires after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            id: generate_session_id(),
            counter: 0,
            user: None,
            groups: Vec::new(),
            permissions: Permissions::default(),
            user_agent: String::new(),
            ip: String::new(),
            expires_at: expiry_after(ttl),
            created_at: Utc::now(),
            flash: None,
            meta: HashMap::new(),
        }
    }

    /// A fresh session for a logged-in user.
    pub fn for_user(user: &User, groups: &[Group], permissions: Permissions, ttl: Duration) -> Self {
        let mut session = Self::new(ttl);
        session.user = Some(SessionUser::from(user));
        session.set_access(groups, permissions);
        session
    }

    /// Replace the groups and permissions carried by the session.
    pub fn set_access(&mut self, groups: &[Group], permissions: Permissions) {
        let mut groups: Vec<SessionGroup> = groups.iter().map(SessionGroup::from).collect();
        groups.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        self.groups = groups;
        self.permissions = permissions;
    }

    pub fn with_client(mut self, user_agent: impl Into<String>, ip: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self.ip = ip.into();
        self
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before expiry, `None` once expired.
    pub fn time_to_live(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Push the expiry to `now + ttl` if that is later. Only takes effect once saved.
    pub fn extend(&mut self, ttl: Duration) {
        let candidate = expiry_after(ttl);
        if candidate > self.expires_at {
            self.expires_at = candidate;
        }
    }

    /// Name of the highest-priority group.
    pub fn group_name(&self) -> Option<&str> {
        self.groups.first().map(|g| g.name.as_str())
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.has(name)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.meta.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.meta.remove(key)
    }

    /// Set the flash message. It stays until [`Session::clear_flash`] is called.
    pub fn flash(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.flash = Some(Flash {
            kind: kind.into(),
            message: message.into(),
        });
    }

    pub fn has_flash(&self) -> bool {
        self.flash.is_some()
    }

    pub fn clear_flash(&mut self) -> Option<Flash> {
        self.flash.take()
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u32,
    #[serde(flatten)]
    session: &'a Session,
}

#[derive(Deserialize)]
struct PayloadVersion {
    v: u32,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(flatten)]
    session: Session,
}

/// Encode a session for storage.
pub fn encode(session: &Session) -> Result<String, CacheError> {
    serde_json::to_string(&EnvelopeRef {
        v: PAYLOAD_VERSION,
        session,
    })
    .map_err(|e| CacheError::Corrupt {
        key: session.id.clone(),
        reason: format!("encode session: {e}"),
    })
}

/// Decode a stored session. `key` only labels errors.
pub fn decode(key: &str, payload: &str) -> Result<Session, CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let header: PayloadVersion = serde_json::from_str(payload).map_err(|e| corrupt(format!("read payload version: {e}")))?;
    if header.v != PAYLOAD_VERSION {
        return Err(corrupt(format!("unsupported payload version {}", header.v)));
    }

    let envelope: Envelope = serde_json::from_str(payload).map_err(|e| corrupt(format!("decode session: {e}")))?;
    Ok(envelope.session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permissions::ResolvedPermission;
    use crate::db::models::permissions::PermissionKind;
    use serde_json::json;
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Alice".to_string(),
            email: "a@b.com".to_string(),
            phone: "555".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            confirmed_at: None,
            last_login: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn group(name: &str, priority: i32) -> Group {
        Group {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            priority,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_id_is_64_hex_chars() {
        let a = generate_session_id();
        let b = generate_session_id();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_session_is_anonymous() {
        let session = Session::new(Duration::from_secs(60));

        assert!(session.is_anonymous());
        assert!(!session.is_authenticated());
        assert!(!session.expired());
        assert_eq!(session.counter, 0);
        assert!(session.meta.is_empty());
        assert!(session.user_id().is_none());
    }

    #[test]
    fn test_for_user_orders_groups_by_priority() {
        let user = user();
        let groups = vec![group("members", 1), group("admins", 10), group("staff", 5)];
        let session = Session::for_user(&user, &groups, Permissions::default(), Duration::from_secs(60));

        assert_eq!(session.user_id(), Some(user.id));
        assert_eq!(session.group_name(), Some("admins"));
        let names: Vec<_> = session.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["admins", "staff", "members"]);
    }

    #[test]
    fn test_expiry_and_extend() {
        let mut session = Session::new(Duration::from_secs(60));
        session.expires_at = Utc::now() - TimeDelta::seconds(1);
        assert!(session.expired());
        assert!(session.time_to_live().is_none());

        session.extend(Duration::from_secs(120));
        assert!(!session.expired());
        let ttl = session.time_to_live().unwrap();
        assert!(ttl > Duration::from_secs(110) && ttl <= Duration::from_secs(120));

        // Never moves backwards
        let before = session.expires_at;
        session.extend(Duration::from_secs(1));
        assert_eq!(session.expires_at, before);
    }

    #[test]
    fn test_meta_and_flash() {
        let mut session = Session::new(Duration::from_secs(60));

        session.set("cart", json!({"items": [1, 2]}));
        assert_eq!(session.get("cart"), Some(&json!({"items": [1, 2]})));
        assert_eq!(session.remove("cart"), Some(json!({"items": [1, 2]})));
        assert!(session.get("cart").is_none());

        session.flash("success", "Welcome back");
        assert!(session.has_flash());
        // Reading does not consume
        assert!(session.has_flash());
        let flash = session.clear_flash().unwrap();
        assert_eq!(flash.kind, "success");
        assert!(!session.has_flash());
    }

    #[test]
    fn test_payload_round_trip() {
        let user = user();
        let permissions: Permissions = [
            (
                "export".to_string(),
                ResolvedPermission {
                    kind: PermissionKind::Access,
                    value: 1,
                },
            ),
            (
                "max_items".to_string(),
                ResolvedPermission {
                    kind: PermissionKind::Quantity,
                    value: 42,
                },
            ),
        ]
        .into_iter()
        .collect();

        let mut session = Session::for_user(&user, &[group("staff", 5)], permissions, Duration::from_secs(3600))
            .with_client("Mozilla/5.0", "203.0.113.7");
        session.counter = 7;
        session.set("theme", json!("dark"));
        session.set("nested", json!({"a": [1, null, "x"], "b": 1.5}));
        session.flash("warning", "Password expires soon");

        let payload = encode(&session).unwrap();
        let decoded = decode(&session.id, &payload).unwrap();
        assert_eq!(decoded, session);

        // Password hashes never reach the payload
        assert!(!payload.contains("argon2"));
        assert!(payload.contains("\"v\":1"));
    }

    #[test]
    fn test_decode_rejects_unknown_version_and_garbage() {
        let session = Session::new(Duration::from_secs(60));
        let payload = encode(&session).unwrap().replace("\"v\":1", "\"v\":2");

        assert!(matches!(decode("k", &payload), Err(CacheError::Corrupt { .. })));
        assert!(matches!(decode("k", "not json"), Err(CacheError::Corrupt { .. })));
        assert!(matches!(decode("k", "{\"v\":1}"), Err(CacheError::Corrupt { .. })));
    }
}
