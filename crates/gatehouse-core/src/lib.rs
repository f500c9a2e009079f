pub mod change;
pub mod criteria;
pub mod ids;
pub mod permission;
pub mod query;
pub mod snapshot;

pub use change::{GroupPermissionChange, Operation, PermissionChange, UserPermissionChange};
pub use ids::{GroupId, OrganizationId, ResourceId, UserId};
pub use permission::{
    ANYONE, Group, PermissionAssignment, Resource, Subject, SubjectKind, User, keys,
};
pub use query::{PermissionPredicate, PermissionQuery, QueryError, SubjectPool};
pub use snapshot::{AuthorizationSnapshot, IndexedAuthorizationDocument};
