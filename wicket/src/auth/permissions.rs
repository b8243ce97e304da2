//! Permission resolution across group memberships.
//!
//! A user's effective value for a permission comes from the override of the highest-priority
//! group they belong to that overrides it. Equal priorities are broken by the lowest group id, so
//! the result never depends on the order rows arrive in. Permissions no group overrides take the
//! catalog default.
//!
//! The resolved [`Permissions`] are stored in the session and only recomputed when the session is
//! refreshed, see [`crate::auth::AuthService::refresh_session`].

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::handlers::{self, GroupPermissions as GroupPermissionsRepo, Groups};
use crate::db::models::groups::Group;
use crate::db::models::permissions::{GroupPermission, Permission, PermissionKind};
use crate::types::{UserId, abbrev_uuid};

/// A catalog permission with its value for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPermission {
    pub kind: PermissionKind,
    pub value: i32,
}

/// Effective permissions of a user, keyed by permission name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, ResolvedPermission>);

impl Permissions {
    /// True when the permission's effective value is positive.
    pub fn has(&self, name: &str) -> bool {
        self.value(name) > 0
    }

    /// Effective value, 0 for a permission not in the catalog.
    pub fn value(&self, name: &str) -> i32 {
        self.0.get(name).map(|p| p.value).unwrap_or(0)
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedPermission> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedPermission)> {
        self.0.iter().map(|(name, p)| (name.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ResolvedPermission)> for Permissions {
    fn from_iter<I: IntoIterator<Item = (String, ResolvedPermission)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The raw overrides that apply to a user, before resolution.
#[derive(Debug, Clone, Default)]
pub struct GroupPermissions(Vec<GroupPermission>);

impl GroupPermissions {
    pub fn new(rows: Vec<GroupPermission>) -> Self {
        Self(rows)
    }

    /// True when any of the user's groups overrides the permission, whatever the value.
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|row| row.name == name)
    }

    /// The row that decides the permission's value, if any group overrides it.
    pub fn winner(&self, name: &str) -> Option<&GroupPermission> {
        winning_row(&self.0, name)
    }

    pub fn rows(&self) -> &[GroupPermission] {
        &self.0
    }
}

fn winning_row<'a>(rows: &'a [GroupPermission], name: &str) -> Option<&'a GroupPermission> {
    rows.iter()
        .filter(|row| row.name == name)
        .max_by_key(|row| (row.priority, Reverse(row.group_id)))
}

/// Value of `name` given the overrides in `rows`, or `default` when no row overrides it.
pub fn effective_value(rows: &[GroupPermission], name: &str, default: i32) -> i32 {
    winning_row(rows, name).map(|row| row.value).unwrap_or(default)
}

/// Resolve every catalog permission against the overrides.
///
/// Rows naming a permission that is not in the catalog are ignored.
pub fn resolve(catalog: &[Permission], rows: &[GroupPermission]) -> Permissions {
    catalog
        .iter()
        .map(|permission| {
            let value = effective_value(rows, &permission.name, permission.default_value);
            (
                permission.name.clone(),
                ResolvedPermission {
                    kind: permission.kind,
                    value,
                },
            )
        })
        .collect()
}

/// Load a user's groups (highest priority first) and resolve their permissions.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn resolve_for_user(conn: &mut PgConnection, user_id: UserId) -> Result<(Vec<Group>, Permissions)> {
    let groups = Groups::new(&mut *conn).user_groups(user_id).await?;
    let rows = GroupPermissionsRepo::new(&mut *conn).for_user(user_id).await?;
    let catalog = handlers::Permissions::new(&mut *conn).catalog().await?;

    let permissions = resolve(&catalog, &rows);
    tracing::debug!(groups = groups.len(), overrides = rows.len(), "resolved permissions");

    Ok((groups, permissions))
}
