//! Appliers that turn a single permission change into at most one row
//! mutation. They never commit; the caller owns the session.

use gatehouse_core::{
    GroupPermissionChange, Operation, OrganizationId, PermissionAssignment, PermissionQuery,
    ResourceId, Subject, SubjectPool, UserPermissionChange, keys,
};
use gatehouse_storage::{PermissionSession, StorageError};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, Default)]
pub struct UserPermissionChanger;

impl UserPermissionChanger {
    pub fn new() -> Self {
        Self
    }

    /// Returns whether a row was inserted or deleted.
    pub async fn apply<S: PermissionSession>(
        &self,
        session: &mut S,
        change: &UserPermissionChange,
    ) -> Result<bool, SyncError> {
        let held = session
            .permissions_of_user(
                &change.organization_id,
                &change.user_id,
                change.resource_id.as_ref(),
            )
            .await?;

        match change.operation {
            Operation::Add if held.contains(&change.permission) => Ok(false),
            Operation::Add => insert(session, &change.assignment()).await,
            Operation::Remove if !held.contains(&change.permission) => Ok(false),
            Operation::Remove => {
                check_not_last_admin(
                    session,
                    &change.organization_id,
                    &change.permission,
                    change.resource_id.as_ref(),
                )
                .await?;
                remove(session, &change.assignment()).await
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GroupPermissionChanger;

impl GroupPermissionChanger {
    pub fn new() -> Self {
        Self
    }

    /// Returns whether a row was inserted or deleted. A change without a
    /// group id targets Anyone.
    pub async fn apply<S: PermissionSession>(
        &self,
        session: &mut S,
        change: &GroupPermissionChange,
    ) -> Result<bool, SyncError> {
        if change.operation == Operation::Add
            && change.subject() == Subject::Anyone
            && change.permission == keys::ADMIN
        {
            return Err(SyncError::InvalidChange(format!(
                "permission '{}' cannot be granted to Anyone",
                keys::ADMIN
            )));
        }

        let held = session
            .permissions_of_group(
                &change.organization_id,
                change.group_id.as_ref(),
                change.resource_id.as_ref(),
            )
            .await?;

        match change.operation {
            Operation::Add if held.contains(&change.permission) => Ok(false),
            Operation::Add => insert(session, &change.assignment()).await,
            Operation::Remove if !held.contains(&change.permission) => Ok(false),
            Operation::Remove => {
                check_not_last_admin(
                    session,
                    &change.organization_id,
                    &change.permission,
                    change.resource_id.as_ref(),
                )
                .await?;
                remove(session, &change.assignment()).await
            }
        }
    }
}

async fn insert<S: PermissionSession>(
    session: &mut S,
    assignment: &PermissionAssignment,
) -> Result<bool, SyncError> {
    match session.insert_permission(assignment).await {
        Ok(inserted) => Ok(inserted),
        // Lost a race against a concurrent insert of the same row.
        Err(StorageError::Duplicate { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove<S: PermissionSession>(
    session: &mut S,
    assignment: &PermissionAssignment,
) -> Result<bool, SyncError> {
    Ok(session.delete_permission(assignment).await? > 0)
}

/// Rejects removing the global `admin` permission from its only holder in
/// the organization. Groups and users are counted together.
async fn check_not_last_admin<S: PermissionSession>(
    session: &mut S,
    organization_id: &OrganizationId,
    permission: &str,
    resource_id: Option<&ResourceId>,
) -> Result<(), SyncError> {
    if permission != keys::ADMIN || resource_id.is_some() {
        return Ok(());
    }

    let query = PermissionQuery::builder(organization_id.clone())
        .permission(keys::ADMIN)
        .build()
        .map_err(|e| SyncError::InvalidChange(e.to_string()))?;
    let groups = session.count_subjects(SubjectPool::Groups, &query).await?;
    let users = session.count_subjects(SubjectPool::Users, &query).await?;

    if groups + users <= 1 {
        return Err(SyncError::InvalidChange(format!(
            "last holder of permission '{}' in organization {organization_id} cannot be removed",
            keys::ADMIN
        )));
    }
    Ok(())
}
