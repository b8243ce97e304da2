//! Database repository for groups and memberships.

use std::collections::HashMap;

use sqlx::{Connection, PgConnection};
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::groups::{Group, GroupCreateDBRequest, GroupUpdateDBRequest},
};
use crate::types::{GroupId, UserId, abbrev_uuid};

/// Filter for listing groups
#[derive(Debug, Clone)]
pub struct GroupFilter {
    pub skip: i64,
    pub limit: i64,
}

impl GroupFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }
}

pub struct Groups<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Groups<'c> {
    type CreateRequest = GroupCreateDBRequest;
    type UpdateRequest = GroupUpdateDBRequest;
    type Response = Group;
    type Id = GroupId;
    type Filter = GroupFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO groups (name, description, priority)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.priority)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(group)
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let group = sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(group)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<GroupId>) -> Result<HashMap<GroupId, Group>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let groups = sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(groups.into_iter().map(|g| (g.id, g)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let groups = sqlx::query_as::<_, Group>("SELECT * FROM groups ORDER BY priority DESC, id ASC LIMIT $1 OFFSET $2")
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(groups)
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM groups WHERE id = $1").bind(id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(group_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            UPDATE groups SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                priority = COALESCE($4, priority),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.priority)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(group)
    }
}

impl<'c> Groups<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, name), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(group)
    }

    /// Add a user to a group. Adding an existing member is a no-op.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn add_user(&mut self, user_id: UserId, group_id: GroupId) -> Result<()> {
        match sqlx::query("INSERT INTO group_users (user_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(group_id)
            .execute(&mut *self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                // Foreign key violation means either user or group doesn't exist
                Err(DbError::NotFound)
            }
            Err(e) => Err(DbError::from(e)),
        }
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn remove_user(&mut self, user_id: UserId, group_id: GroupId) -> Result<()> {
        let result = sqlx::query("DELETE FROM group_users WHERE user_id = $1 AND group_id = $2")
            .bind(user_id)
            .bind(group_id)
            .execute(&mut *self.db)
            .await?;

        if result.rows_affected() > 0 {
            Ok(())
        } else {
            Err(DbError::NotFound)
        }
    }

    /// Replace all of a user's memberships with `group_ids`.
    #[instrument(skip(self, group_ids), fields(user_id = %abbrev_uuid(&user_id), count = group_ids.len()), err)]
    pub async fn set_user_groups(&mut self, user_id: UserId, group_ids: &[GroupId]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM group_users WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if !group_ids.is_empty() {
            let result = sqlx::query(
                r#"
                INSERT INTO group_users (user_id, group_id)
                SELECT $1, UNNEST($2::uuid[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(group_ids)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => return Err(DbError::NotFound),
                Err(e) => return Err(DbError::from(e)),
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Groups the user belongs to, highest priority first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn user_groups(&mut self, user_id: UserId) -> Result<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.* FROM groups g
            JOIN group_users gu ON gu.group_id = g.id
            WHERE gu.user_id = $1
            ORDER BY g.priority DESC, g.id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(groups)
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn member_count(&mut self, group_id: GroupId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_users WHERE group_id = $1")
            .bind(group_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}
