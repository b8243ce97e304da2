//! Database models for groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::GroupId;

/// Database entity model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    /// Higher wins when groups disagree on a permission
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database request for creating a new group
#[derive(Debug, Clone)]
pub struct GroupCreateDBRequest {
    pub name: String,
    pub description: String,
    pub priority: i32,
}

/// Database request for updating a group
#[derive(Debug, Clone, Default)]
pub struct GroupUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i32>,
}
