pub mod migrations;
mod queries;

use std::collections::BTreeSet;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use gatehouse_core::{
    AuthorizationSnapshot, Group, GroupId, OrganizationId, PermissionAssignment, PermissionQuery,
    Resource, ResourceId, SubjectPool, User, UserId,
};

use crate::traits::{
    CountPerResourcePermission, PermissionSession, PermissionStore, SnapshotScope, StorageError,
};

use queries::to_storage_error;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(to_storage_error)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        migrations::run_migrations(&self.pool)
            .await
            .map_err(to_storage_error)
    }
}

impl PermissionStore for PostgresStore {
    type Session = PostgresSession;

    async fn open_session(&self) -> Result<PostgresSession, StorageError> {
        let tx = self.pool.begin().await.map_err(to_storage_error)?;
        Ok(PostgresSession {
            pool: self.pool.clone(),
            tx: Some(tx),
        })
    }
}

/// One open transaction at a time. After `commit` or `rollback` the session
/// begins a new one so callers can keep using it.
///
/// A failed statement aborts the current transaction in Postgres; roll back
/// before issuing further calls.
pub struct PostgresSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresSession {
    fn conn(&mut self) -> Result<&mut PgConnection, StorageError> {
        self.tx.as_deref_mut().ok_or(StorageError::SessionClosed)
    }

    async fn restart(&mut self) -> Result<(), StorageError> {
        self.tx = Some(self.pool.begin().await.map_err(to_storage_error)?);
        Ok(())
    }
}

impl PermissionSession for PostgresSession {
    async fn insert_group(&mut self, group: &Group) -> Result<(), StorageError> {
        queries::insert_group(self.conn()?, group).await
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StorageError> {
        queries::insert_user(self.conn()?, user).await
    }

    async fn insert_resource(&mut self, resource: &Resource) -> Result<(), StorageError> {
        queries::insert_resource(self.conn()?, resource).await
    }

    async fn insert_permission(
        &mut self,
        assignment: &PermissionAssignment,
    ) -> Result<bool, StorageError> {
        queries::insert_permission(self.conn()?, assignment).await
    }

    async fn delete_permission(
        &mut self,
        assignment: &PermissionAssignment,
    ) -> Result<usize, StorageError> {
        queries::delete_permission(self.conn()?, assignment).await
    }

    async fn delete_all_for_resource(
        &mut self,
        resource_id: &ResourceId,
    ) -> Result<usize, StorageError> {
        queries::delete_all_for_resource(self.conn()?, resource_id).await
    }

    async fn delete_all_for_organization(
        &mut self,
        organization_id: &OrganizationId,
    ) -> Result<usize, StorageError> {
        queries::delete_all_for_organization(self.conn()?, organization_id).await
    }

    async fn touch_authorization_date(
        &mut self,
        resource_id: &ResourceId,
        at_epoch_millis: i64,
    ) -> Result<(), StorageError> {
        queries::touch_authorization_date(self.conn()?, resource_id, at_epoch_millis).await
    }

    async fn mark_indexed(
        &mut self,
        resource_id: &ResourceId,
        at_epoch_millis: i64,
    ) -> Result<(), StorageError> {
        queries::mark_indexed(self.conn()?, resource_id, at_epoch_millis).await
    }

    async fn count_subjects(
        &mut self,
        pool: SubjectPool,
        query: &PermissionQuery,
    ) -> Result<usize, StorageError> {
        queries::count_subjects(self.conn()?, pool, query).await
    }

    async fn list_subject_names(
        &mut self,
        pool: SubjectPool,
        query: &PermissionQuery,
    ) -> Result<Vec<String>, StorageError> {
        queries::list_subject_names(self.conn()?, pool, query).await
    }

    async fn permissions_of_group(
        &mut self,
        organization_id: &OrganizationId,
        group_id: Option<&GroupId>,
        resource_id: Option<&ResourceId>,
    ) -> Result<BTreeSet<String>, StorageError> {
        queries::permissions_of_group(self.conn()?, organization_id, group_id, resource_id).await
    }

    async fn permissions_of_user(
        &mut self,
        organization_id: &OrganizationId,
        user_id: &UserId,
        resource_id: Option<&ResourceId>,
    ) -> Result<BTreeSet<String>, StorageError> {
        queries::permissions_of_user(self.conn()?, organization_id, user_id, resource_id).await
    }

    async fn has_any_permission(&mut self, resource_id: &ResourceId) -> Result<bool, StorageError> {
        queries::has_any_permission(self.conn()?, resource_id).await
    }

    async fn count_groups_by_resource_and_permission(
        &mut self,
        resource_ids: &[ResourceId],
    ) -> Result<Vec<CountPerResourcePermission>, StorageError> {
        queries::count_groups_by_resource_and_permission(self.conn()?, resource_ids).await
    }

    async fn group_permissions_by_names(
        &mut self,
        organization_id: &OrganizationId,
        names: &[String],
        resource_id: Option<&ResourceId>,
    ) -> Result<Vec<PermissionAssignment>, StorageError> {
        queries::group_permissions_by_names(self.conn()?, organization_id, names, resource_id)
            .await
    }

    async fn authorization_snapshots(
        &mut self,
        scope: &SnapshotScope,
        permission: &str,
    ) -> Result<Vec<AuthorizationSnapshot>, StorageError> {
        queries::authorization_snapshots(self.conn()?, scope, permission).await
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        let tx = self.tx.take().ok_or(StorageError::SessionClosed)?;
        tx.commit().await.map_err(to_storage_error)?;
        self.restart().await
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        let tx = self.tx.take().ok_or(StorageError::SessionClosed)?;
        tx.rollback().await.map_err(to_storage_error)?;
        self.restart().await
    }
}
