//! Database repository for per-group permission overrides.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    models::permissions::GroupPermission,
};
use crate::types::{GroupId, PermissionId, UserId, abbrev_uuid};

const SELECT_JOINED: &str = r#"
    SELECT gp.group_id, gp.permission_id, g.priority, p.name, gp.value
    FROM group_permissions gp
    JOIN groups g ON g.id = gp.group_id
    JOIN permissions p ON p.id = gp.permission_id
"#;

pub struct GroupPermissions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> GroupPermissions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Set a group's value for a permission, replacing any previous override.
    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id), permission_id = %abbrev_uuid(&permission_id)), err)]
    pub async fn set(&mut self, group_id: GroupId, permission_id: PermissionId, value: i32) -> Result<()> {
        match sqlx::query(
            r#"
            INSERT INTO group_permissions (group_id, permission_id, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, permission_id) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(group_id)
        .bind(permission_id)
        .bind(value)
        .execute(&mut *self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => Err(DbError::NotFound),
            Err(e) => Err(DbError::from(e)),
        }
    }

    /// Drop a group's override so the permission falls back to lower groups or its default.
    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id), permission_id = %abbrev_uuid(&permission_id)), err)]
    pub async fn remove(&mut self, group_id: GroupId, permission_id: PermissionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM group_permissions WHERE group_id = $1 AND permission_id = $2")
            .bind(group_id)
            .bind(permission_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn for_group(&mut self, group_id: GroupId) -> Result<Vec<GroupPermission>> {
        let rows = sqlx::query_as::<_, GroupPermission>(&format!("{SELECT_JOINED} WHERE gp.group_id = $1 ORDER BY p.name"))
            .bind(group_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(rows)
    }

    /// Every override that applies to the user through any of their groups, highest priority
    /// first and lowest group id first among equals.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn for_user(&mut self, user_id: UserId) -> Result<Vec<GroupPermission>> {
        let rows = sqlx::query_as::<_, GroupPermission>(&format!(
            "{SELECT_JOINED} JOIN group_users gu ON gu.group_id = gp.group_id \
             WHERE gu.user_id = $1 ORDER BY g.priority DESC, gp.group_id ASC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Groups, Permissions, Repository};
    use crate::db::models::groups::GroupCreateDBRequest;
    use crate::db::models::permissions::{PermissionCreateDBRequest, PermissionKind};
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_set_is_upsert_and_for_user_is_ordered(pool: PgPool) {
        let user = create_test_user(&pool, "gp@example.com").await;
        let mut conn = pool.acquire().await.unwrap();

        let perm = Permissions::new(&mut conn)
            .create(&PermissionCreateDBRequest {
                name: "max_items".to_string(),
                description: String::new(),
                kind: PermissionKind::Quantity,
                default_value: 1,
            })
            .await
            .unwrap();

        let mut groups = Groups::new(&mut conn);
        let low = groups
            .create(&GroupCreateDBRequest {
                name: "low".to_string(),
                description: String::new(),
                priority: 5,
            })
            .await
            .unwrap();
        let high = groups
            .create(&GroupCreateDBRequest {
                name: "high".to_string(),
                description: String::new(),
                priority: 10,
            })
            .await
            .unwrap();
        groups.add_user(user.id, low.id).await.unwrap();
        groups.add_user(user.id, high.id).await.unwrap();

        let mut repo = GroupPermissions::new(&mut conn);
        repo.set(low.id, perm.id, 5).await.unwrap();
        repo.set(high.id, perm.id, 1).await.unwrap();
        repo.set(high.id, perm.id, 2).await.unwrap();

        let rows = repo.for_user(user.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].group_id, rows[0].priority, rows[0].value), (high.id, 10, 2));
        assert_eq!((rows[1].group_id, rows[1].priority, rows[1].value), (low.id, 5, 5));
        assert_eq!(rows[0].name, "max_items");

        assert!(repo.remove(high.id, perm.id).await.unwrap());
        assert!(!repo.remove(high.id, perm.id).await.unwrap());
        assert_eq!(repo.for_group(high.id).await.unwrap().len(), 0);
        assert_eq!(repo.for_group(low.id).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_set_on_missing_group_is_not_found(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = GroupPermissions::new(&mut conn);

        let err = repo.set(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
