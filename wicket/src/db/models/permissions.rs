//! Database models for permissions and group overrides.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{GroupId, PermissionId};

/// How a permission's value is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    /// 0 denies, anything positive grants
    #[default]
    Access,
    /// An amount, e.g. a maximum number of items
    Quantity,
}

impl PermissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKind::Access => "access",
            PermissionKind::Quantity => "quantity",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(PermissionKind::Access),
            "quantity" => Ok(PermissionKind::Quantity),
            other => Err(format!("unknown permission kind: {other}")),
        }
    }
}

/// Permission catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub description: String,
    pub kind: PermissionKind,
    /// Effective value for users none of whose groups override it
    pub default_value: i32,
}

/// Database request for creating a permission
#[derive(Debug, Clone)]
pub struct PermissionCreateDBRequest {
    pub name: String,
    pub description: String,
    pub kind: PermissionKind,
    pub default_value: i32,
}

/// Database request for updating a permission
#[derive(Debug, Clone, Default)]
pub struct PermissionUpdateDBRequest {
    pub description: Option<String>,
    pub kind: Option<PermissionKind>,
    pub default_value: Option<i32>,
}

/// A group's override of a permission, joined with the group's priority and the permission's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GroupPermission {
    pub group_id: GroupId,
    pub permission_id: PermissionId,
    pub priority: i32,
    pub name: String,
    pub value: i32,
}
