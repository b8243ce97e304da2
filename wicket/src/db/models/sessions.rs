//! Database models for durable session records.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::UserId;

/// Database entity model. `payload` is the encoded session, see [`crate::auth::session::encode`].
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<UserId>,
    pub user_agent: String,
    pub ip: String,
    pub payload: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
