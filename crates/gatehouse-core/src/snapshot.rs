use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::ResourceId;

/// The full, current set of browse grants on one resource, read fresh from
/// the permission store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationSnapshot {
    pub resource_id: ResourceId,
    /// Parents of the resource, root first.
    pub ancestors: Vec<ResourceId>,
    pub group_names: BTreeSet<String>,
    pub user_logins: BTreeSet<String>,
    pub updated_at: i64,
}

impl AuthorizationSnapshot {
    pub fn new(resource_id: impl Into<ResourceId>, updated_at: i64) -> Self {
        Self {
            resource_id: resource_id.into(),
            ancestors: Vec::new(),
            group_names: BTreeSet::new(),
            user_logins: BTreeSet::new(),
            updated_at,
        }
    }

    pub fn with_ancestors(mut self, ancestors: Vec<ResourceId>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn with_group(mut self, name: impl Into<String>) -> Self {
        self.group_names.insert(name.into());
        self
    }

    pub fn with_user(mut self, login: impl Into<String>) -> Self {
        self.user_logins.insert(login.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.group_names.is_empty() && self.user_logins.is_empty()
    }
}

/// Search-side projection of an [`AuthorizationSnapshot`], keyed by
/// `resource_id`. Replaced wholesale on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedAuthorizationDocument {
    pub resource_id: ResourceId,
    #[serde(default)]
    pub ancestors: Vec<ResourceId>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub users: BTreeSet<String>,
    pub updated_at: i64,
}

impl IndexedAuthorizationDocument {
    pub fn is_descendant_of(&self, resource_id: &ResourceId) -> bool {
        self.ancestors.iter().any(|a| a == resource_id)
    }
}

impl From<&AuthorizationSnapshot> for IndexedAuthorizationDocument {
    fn from(snapshot: &AuthorizationSnapshot) -> Self {
        Self {
            resource_id: snapshot.resource_id.clone(),
            ancestors: snapshot.ancestors.clone(),
            groups: snapshot.group_names.clone(),
            users: snapshot.user_logins.clone(),
            updated_at: snapshot.updated_at,
        }
    }
}

impl From<AuthorizationSnapshot> for IndexedAuthorizationDocument {
    fn from(snapshot: AuthorizationSnapshot) -> Self {
        Self {
            resource_id: snapshot.resource_id,
            ancestors: snapshot.ancestors,
            groups: snapshot.group_names,
            users: snapshot.user_logins,
            updated_at: snapshot.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_still_converts_to_document() {
        let snapshot = AuthorizationSnapshot::new("p1", 42);
        assert!(snapshot.is_empty());

        let doc = IndexedAuthorizationDocument::from(&snapshot);
        assert_eq!(doc.resource_id, ResourceId::new("p1"));
        assert!(doc.groups.is_empty());
        assert!(doc.users.is_empty());
        assert_eq!(doc.updated_at, 42);
    }

    #[test]
    fn document_knows_its_ancestors() {
        let doc: IndexedAuthorizationDocument = AuthorizationSnapshot::new("c", 1)
            .with_ancestors(vec![ResourceId::new("a"), ResourceId::new("b")])
            .into();

        assert!(doc.is_descendant_of(&ResourceId::new("a")));
        assert!(doc.is_descendant_of(&ResourceId::new("b")));
        assert!(!doc.is_descendant_of(&ResourceId::new("c")));
    }

    #[test]
    fn document_serializes_with_camel_case_fields() {
        let doc: IndexedAuthorizationDocument = AuthorizationSnapshot::new("p1", 7)
            .with_group("devs")
            .with_user("john")
            .into();

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["resourceId"], "p1");
        assert_eq!(json["groups"][0], "devs");
        assert_eq!(json["users"][0], "john");
        assert_eq!(json["updatedAt"], 7);
    }
}
