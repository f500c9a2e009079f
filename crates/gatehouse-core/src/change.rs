use std::fmt;

use crate::ids::{GroupId, OrganizationId, ResourceId, UserId};
use crate::permission::{PermissionAssignment, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => f.write_str("add"),
            Operation::Remove => f.write_str("remove"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPermissionChange {
    pub operation: Operation,
    pub permission: String,
    pub resource_id: Option<ResourceId>,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
}

impl UserPermissionChange {
    pub fn new(
        operation: Operation,
        organization_id: impl Into<OrganizationId>,
        permission: impl Into<String>,
        resource_id: Option<ResourceId>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            operation,
            permission: permission.into(),
            resource_id,
            organization_id: organization_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn assignment(&self) -> PermissionAssignment {
        PermissionAssignment {
            subject: Subject::User(self.user_id.clone()),
            organization_id: self.organization_id.clone(),
            permission: self.permission.clone(),
            resource_id: self.resource_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPermissionChange {
    pub operation: Operation,
    pub permission: String,
    pub resource_id: Option<ResourceId>,
    pub organization_id: OrganizationId,
    /// `None` targets the Anyone group.
    pub group_id: Option<GroupId>,
}

impl GroupPermissionChange {
    pub fn new(
        operation: Operation,
        organization_id: impl Into<OrganizationId>,
        permission: impl Into<String>,
        resource_id: Option<ResourceId>,
        group_id: Option<GroupId>,
    ) -> Self {
        Self {
            operation,
            permission: permission.into(),
            resource_id,
            organization_id: organization_id.into(),
            group_id,
        }
    }

    pub fn subject(&self) -> Subject {
        Subject::group_or_anyone(self.group_id.clone())
    }

    pub fn assignment(&self) -> PermissionAssignment {
        PermissionAssignment {
            subject: self.subject(),
            organization_id: self.organization_id.clone(),
            permission: self.permission.clone(),
            resource_id: self.resource_id.clone(),
        }
    }
}

/// One requested permission mutation. Built per request by the caller and
/// consumed once by the updater.
///
/// New variants must be added here and to the updater's dispatch together;
/// downstream crates see the enum as non-exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PermissionChange {
    User(UserPermissionChange),
    Group(GroupPermissionChange),
}

impl PermissionChange {
    pub fn operation(&self) -> Operation {
        match self {
            PermissionChange::User(c) => c.operation,
            PermissionChange::Group(c) => c.operation,
        }
    }

    pub fn permission(&self) -> &str {
        match self {
            PermissionChange::User(c) => &c.permission,
            PermissionChange::Group(c) => &c.permission,
        }
    }

    pub fn organization_id(&self) -> &OrganizationId {
        match self {
            PermissionChange::User(c) => &c.organization_id,
            PermissionChange::Group(c) => &c.organization_id,
        }
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            PermissionChange::User(c) => c.resource_id.as_ref(),
            PermissionChange::Group(c) => c.resource_id.as_ref(),
        }
    }

    pub fn subject(&self) -> Subject {
        match self {
            PermissionChange::User(c) => Subject::User(c.user_id.clone()),
            PermissionChange::Group(c) => c.subject(),
        }
    }
}

impl From<UserPermissionChange> for PermissionChange {
    fn from(change: UserPermissionChange) -> Self {
        PermissionChange::User(change)
    }
}

impl From<GroupPermissionChange> for PermissionChange {
    fn from(change: GroupPermissionChange) -> Self {
        PermissionChange::Group(change)
    }
}
