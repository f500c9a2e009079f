use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, OrganizationId, ResourceId, UserId};

/// Display name of the synthetic group every principal belongs to.
pub const ANYONE: &str = "Anyone";

pub mod keys {
    pub const ADMIN: &str = "admin";
    pub const USER: &str = "user";
    pub const CODEVIEWER: &str = "codeviewer";
    pub const ISSUE_ADMIN: &str = "issueadmin";
    pub const SCAN_EXECUTION: &str = "scan";
    pub const PROVISIONING: &str = "provisioning";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Group,
    Anyone,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Subject {
    User(UserId),
    Group(GroupId),
    Anyone,
}

impl Subject {
    /// Maps the optional group identifier used by callers onto a subject,
    /// `None` standing for Anyone.
    pub fn group_or_anyone(group_id: Option<GroupId>) -> Self {
        match group_id {
            Some(id) => Subject::Group(id),
            None => Subject::Anyone,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User(_) => SubjectKind::User,
            Subject::Group(_) => SubjectKind::Group,
            Subject::Anyone => SubjectKind::Anyone,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Subject::User(id) => Some(id.as_str()),
            Subject::Group(id) => Some(id.as_str()),
            Subject::Anyone => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{id}"),
            Subject::Group(id) => write!(f, "group:{id}"),
            Subject::Anyone => f.write_str(ANYONE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionAssignment {
    pub subject: Subject,
    pub organization_id: OrganizationId,
    pub permission: String,
    pub resource_id: Option<ResourceId>,
}

impl PermissionAssignment {
    pub fn global(
        subject: Subject,
        organization_id: OrganizationId,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            organization_id,
            permission: permission.into(),
            resource_id: None,
        }
    }

    pub fn on_resource(
        subject: Subject,
        organization_id: OrganizationId,
        permission: impl Into<String>,
        resource_id: ResourceId,
    ) -> Self {
        Self {
            subject,
            organization_id,
            permission: permission.into(),
            resource_id: Some(resource_id),
        }
    }

    pub fn is_global(&self) -> bool {
        self.resource_id.is_none()
    }
}

impl fmt::Display for PermissionAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.subject, self.organization_id, self.permission)?;
        if let Some(ref resource) = self.resource_id {
            write!(f, " on {resource}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub organization_id: OrganizationId,
    pub name: String,
}

impl Group {
    pub fn new(
        id: impl Into<GroupId>,
        organization_id: impl Into<OrganizationId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub name: String,
    pub active: bool,
}

impl User {
    pub fn new(id: impl Into<UserId>, login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            id: id.into(),
            name: login.clone(),
            login,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub organization_id: OrganizationId,
    pub parent_id: Option<ResourceId>,
    pub name: String,
}

impl Resource {
    pub fn root(
        id: impl Into<ResourceId>,
        organization_id: impl Into<OrganizationId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            parent_id: None,
            name: name.into(),
        }
    }

    pub fn child_of(mut self, parent: impl Into<ResourceId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }
}
