//! Database models for one-time tokens.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::UserId;

/// Which flow a token belongs to. Each kind lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Registration,
    PasswordReset,
}

impl TokenKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            TokenKind::Registration => "registration_tokens",
            TokenKind::PasswordReset => "pass_tokens",
        }
    }
}

/// Database entity model. There is at most one per user and kind.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRecord {
    pub user_id: UserId,
    /// SHA-256 of the token handed to the user
    pub token_hash: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
