use std::collections::BTreeSet;
use std::future::Future;

use gatehouse_core::{
    AuthorizationSnapshot, Group, GroupId, OrganizationId, PermissionAssignment, PermissionQuery,
    Resource, ResourceId, SubjectPool, User, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("duplicate {kind}: {id}")]
    Duplicate { kind: &'static str, id: String },
    #[error("session is closed")]
    SessionClosed,
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Which resources an authorization snapshot read covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotScope {
    /// Every resource referenced by at least one permission row.
    WithAnyPermission,
    /// The listed resources; unknown ids are skipped.
    Resources(Vec<ResourceId>),
    /// Resources whose authorization timestamp is newer than the last
    /// timestamp recorded with [`PermissionSession::mark_indexed`].
    PendingIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountPerResourcePermission {
    pub resource_id: ResourceId,
    pub permission: String,
    pub count: usize,
}

pub trait PermissionStore: Send + Sync {
    type Session: PermissionSession;

    fn open_session(&self) -> impl Future<Output = Result<Self::Session, StorageError>> + Send;
}

/// A transactional unit of work over the permission tables.
///
/// Writes are invisible to other sessions until [`commit`](Self::commit).
/// A session stays usable after `commit` or `rollback`: the next call runs
/// in a fresh transaction. Dropping a session discards uncommitted writes.
pub trait PermissionSession: Send {
    fn insert_group(
        &mut self,
        group: &Group,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn insert_user(&mut self, user: &User)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    fn insert_resource(
        &mut self,
        resource: &Resource,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Inserts the row unless it already exists. Returns whether a row was added.
    fn insert_permission(
        &mut self,
        assignment: &PermissionAssignment,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Deletes the row with exactly these coordinates. Returns the number removed.
    fn delete_permission(
        &mut self,
        assignment: &PermissionAssignment,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    fn delete_all_for_resource(
        &mut self,
        resource_id: &ResourceId,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    fn delete_all_for_organization(
        &mut self,
        organization_id: &OrganizationId,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    fn touch_authorization_date(
        &mut self,
        resource_id: &ResourceId,
        at_epoch_millis: i64,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Records that the index holds the resource as of `at_epoch_millis`.
    /// Never moves the recorded value backwards.
    fn mark_indexed(
        &mut self,
        resource_id: &ResourceId,
        at_epoch_millis: i64,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn count_subjects(
        &mut self,
        pool: SubjectPool,
        query: &PermissionQuery,
    ) -> impl Future<Output = Result<usize, StorageError>> + Send;

    fn list_subject_names(
        &mut self,
        pool: SubjectPool,
        query: &PermissionQuery,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Permission keys held by the group, or by Anyone when `group_id` is
    /// `None`, in exactly the given scope.
    fn permissions_of_group(
        &mut self,
        organization_id: &OrganizationId,
        group_id: Option<&GroupId>,
        resource_id: Option<&ResourceId>,
    ) -> impl Future<Output = Result<BTreeSet<String>, StorageError>> + Send;

    fn permissions_of_user(
        &mut self,
        organization_id: &OrganizationId,
        user_id: &UserId,
        resource_id: Option<&ResourceId>,
    ) -> impl Future<Output = Result<BTreeSet<String>, StorageError>> + Send;

    fn has_any_permission(
        &mut self,
        resource_id: &ResourceId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn count_groups_by_resource_and_permission(
        &mut self,
        resource_ids: &[ResourceId],
    ) -> impl Future<Output = Result<Vec<CountPerResourcePermission>, StorageError>> + Send;

    /// Group rows (Anyone included under its display name) of the named
    /// groups in exactly the given scope.
    fn group_permissions_by_names(
        &mut self,
        organization_id: &OrganizationId,
        names: &[String],
        resource_id: Option<&ResourceId>,
    ) -> impl Future<Output = Result<Vec<PermissionAssignment>, StorageError>> + Send;

    /// Snapshots of the grants of `permission`, ordered by resource id.
    fn authorization_snapshots(
        &mut self,
        scope: &SnapshotScope,
        permission: &str,
    ) -> impl Future<Output = Result<Vec<AuthorizationSnapshot>, StorageError>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<(), StorageError>> + Send;
}
