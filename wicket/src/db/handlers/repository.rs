//! The CRUD surface shared by the entity repositories.

use std::collections::HashMap;

use crate::db::errors::{DbError, Result};

/// Create, read, update, delete and list over one table.
///
/// Implementors wrap a `&mut PgConnection` (a pooled connection or an open transaction), so the
/// same repository code runs inside and outside transactions.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    /// Row type returned by every operation
    type Response;
    type Id: Send + Sync + Copy;
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Rows for `ids` keyed by id; unknown ids are absent from the map.
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// `false` when there was nothing to delete.
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    /// Fails with [`DbError::NotFound`] when the row does not exist.
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;

    /// Like [`Repository::get_by_id`], with a missing row as [`DbError::NotFound`].
    async fn get_required(&mut self, id: Self::Id) -> Result<Self::Response>
    where
        Self: Send,
    {
        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }
}
