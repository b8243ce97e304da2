//! Database repository for the permission catalog.

use std::collections::HashMap;

use sqlx::{Connection, FromRow, PgConnection};
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::permissions::{Permission, PermissionCreateDBRequest, PermissionKind, PermissionUpdateDBRequest},
};
use crate::types::{PermissionId, abbrev_uuid};

/// Filter for listing permissions
#[derive(Debug, Clone)]
pub struct PermissionFilter {
    pub skip: i64,
    pub limit: i64,
}

impl PermissionFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct PermissionRow {
    id: PermissionId,
    name: String,
    description: String,
    kind: String,
    default_value: i32,
}

impl TryFrom<PermissionRow> for Permission {
    type Error = DbError;

    fn try_from(row: PermissionRow) -> Result<Self> {
        let kind = row.kind.parse::<PermissionKind>().map_err(|e| DbError::Other(anyhow::anyhow!(e)))?;
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            kind,
            default_value: row.default_value,
        })
    }
}

pub struct Permissions<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Permissions<'c> {
    type CreateRequest = PermissionCreateDBRequest;
    type UpdateRequest = PermissionUpdateDBRequest;
    type Response = Permission;
    type Id = PermissionId;
    type Filter = PermissionFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            INSERT INTO permissions (name, description, kind, default_value)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.kind.as_str())
        .bind(request.default_value)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), fields(permission_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let row = sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(Permission::try_from).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<PermissionId>) -> Result<HashMap<PermissionId, Permission>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;

        rows.into_iter().map(|r| Permission::try_from(r).map(|p| (p.id, p))).collect()
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let rows = sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions ORDER BY name LIMIT $1 OFFSET $2")
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;

        rows.into_iter().map(Permission::try_from).collect()
    }

    #[instrument(skip(self), fields(permission_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(permission_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r#"
            UPDATE permissions SET
                description = COALESCE($2, description),
                kind = COALESCE($3, kind),
                default_value = COALESCE($4, default_value)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.description)
        .bind(request.kind.map(PermissionKind::as_str))
        .bind(request.default_value)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        row.try_into()
    }
}

impl<'c> Permissions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, name), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(Permission::try_from).transpose()
    }

    /// The whole catalog, by name.
    #[instrument(skip(self), err)]
    pub async fn catalog(&mut self) -> Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions ORDER BY name")
            .fetch_all(&mut *self.db)
            .await?;

        rows.into_iter().map(Permission::try_from).collect()
    }

    /// Insert catalog entries that don't exist yet. Existing entries (matched by name) are left
    /// untouched. Returns how many were inserted.
    #[instrument(skip(self, entries), fields(count = entries.len()), err)]
    pub async fn seed(&mut self, entries: &[PermissionCreateDBRequest]) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let mut inserted = 0;

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO permissions (name, description, kind, default_value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(&entry.name)
            .bind(&entry.description)
            .bind(entry.kind.as_str())
            .bind(entry.default_value)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
