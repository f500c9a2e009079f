use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use gatehouse_core::{
    ANYONE, AuthorizationSnapshot, Group, GroupId, OrganizationId, PermissionAssignment,
    PermissionPredicate, PermissionQuery, Resource, ResourceId, Subject, SubjectPool, User, UserId,
};

use crate::traits::{
    CountPerResourcePermission, PermissionSession, PermissionStore, SnapshotScope, StorageError,
};

#[derive(Debug, Clone)]
struct StoredResource {
    resource: Resource,
    ancestors: Vec<ResourceId>,
    authorization_updated_at: Option<i64>,
    indexed_at: Option<i64>,
}

impl StoredResource {
    fn index_pending(&self) -> bool {
        self.authorization_updated_at
            .is_some_and(|at| self.indexed_at.is_none_or(|indexed| indexed < at))
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    InsertGroup(Group),
    InsertUser(User),
    InsertResource(StoredResource),
    InsertPermission(PermissionAssignment),
    DeletePermission(PermissionAssignment),
    DeleteResourcePermissions(ResourceId),
    DeleteOrganizationPermissions(OrganizationId),
    TouchResource(ResourceId, i64),
    MarkIndexed(ResourceId, i64),
}

#[derive(Debug, Clone, Default)]
struct InnerState {
    groups: BTreeMap<GroupId, Group>,
    users: BTreeMap<UserId, User>,
    resources: BTreeMap<ResourceId, StoredResource>,
    assignments: Vec<PermissionAssignment>,
}

impl InnerState {
    /// Returns the number of permission rows the mutation added or removed.
    fn apply(&mut self, mutation: &Mutation) -> usize {
        match mutation {
            Mutation::InsertGroup(group) => {
                self.groups.insert(group.id.clone(), group.clone());
                0
            }
            Mutation::InsertUser(user) => {
                self.users.insert(user.id.clone(), user.clone());
                0
            }
            Mutation::InsertResource(stored) => {
                self.resources
                    .insert(stored.resource.id.clone(), stored.clone());
                0
            }
            Mutation::InsertPermission(assignment) => {
                if self.assignments.contains(assignment) {
                    0
                } else {
                    self.assignments.push(assignment.clone());
                    1
                }
            }
            Mutation::DeletePermission(assignment) => self.retain_assignments(|a| a != assignment),
            Mutation::DeleteResourcePermissions(resource_id) => {
                self.retain_assignments(|a| a.resource_id.as_ref() != Some(resource_id))
            }
            Mutation::DeleteOrganizationPermissions(organization_id) => {
                self.retain_assignments(|a| &a.organization_id != organization_id)
            }
            Mutation::TouchResource(resource_id, at) => {
                if let Some(stored) = self.resources.get_mut(resource_id) {
                    stored.authorization_updated_at = Some(*at);
                }
                0
            }
            Mutation::MarkIndexed(resource_id, at) => {
                if let Some(stored) = self.resources.get_mut(resource_id) {
                    stored.indexed_at = Some(stored.indexed_at.map_or(*at, |i| i.max(*at)));
                }
                0
            }
        }
    }

    /// Checks a journaled mutation against state committed by other sessions
    /// since this one started. Deletes are idempotent and never conflict.
    fn conflict(&self, mutation: &Mutation, affected: usize) -> Option<StorageError> {
        let (kind, id) = match mutation {
            Mutation::InsertGroup(group)
                if self.groups.contains_key(&group.id)
                    || self.groups.values().any(|g| {
                        g.organization_id == group.organization_id && g.name == group.name
                    }) =>
            {
                ("group", group.id.to_string())
            }
            Mutation::InsertUser(user)
                if self.users.contains_key(&user.id)
                    || self.users.values().any(|u| u.login == user.login) =>
            {
                ("user", user.id.to_string())
            }
            Mutation::InsertResource(stored)
                if self.resources.contains_key(&stored.resource.id) =>
            {
                ("resource", stored.resource.id.to_string())
            }
            Mutation::InsertPermission(assignment)
                if affected > 0 && self.assignments.contains(assignment) =>
            {
                ("permission", assignment.to_string())
            }
            _ => return None,
        };
        Some(StorageError::Duplicate { kind, id })
    }

    fn retain_assignments(&mut self, keep: impl Fn(&PermissionAssignment) -> bool) -> usize {
        let before = self.assignments.len();
        self.assignments.retain(|a| keep(a));
        before - self.assignments.len()
    }

    fn holds_matching(&self, subject: &Subject, query: &PermissionQuery) -> bool {
        self.assignments.iter().any(|a| {
            &a.subject == subject
                && a.organization_id == query.organization_id
                && query.matches_permission(&a.permission, a.resource_id.as_ref())
        })
    }

    fn matching_names(&self, pool: SubjectPool, query: &PermissionQuery) -> Vec<String> {
        let by_permission = query.predicate() != PermissionPredicate::Any;

        let mut names: Vec<String> = match pool {
            SubjectPool::Groups => {
                let mut names: Vec<String> = self
                    .groups
                    .values()
                    .filter(|g| g.organization_id == query.organization_id)
                    .filter(|g| {
                        !by_permission || self.holds_matching(&Subject::Group(g.id.clone()), query)
                    })
                    .map(|g| g.name.clone())
                    .collect();
                if self.holds_matching(&Subject::Anyone, query) {
                    names.push(ANYONE.to_string());
                }
                names
            }
            SubjectPool::Users => self
                .users
                .values()
                .filter(|u| u.active)
                .filter(|u| {
                    !by_permission || self.holds_matching(&Subject::User(u.id.clone()), query)
                })
                .map(|u| u.login.clone())
                .collect(),
        };

        names.retain(|name| query.matches_name(name));
        names.sort();
        names
    }

    fn permissions_of(
        &self,
        organization_id: &OrganizationId,
        subject: &Subject,
        resource_id: Option<&ResourceId>,
    ) -> BTreeSet<String> {
        self.assignments
            .iter()
            .filter(|a| {
                &a.subject == subject
                    && &a.organization_id == organization_id
                    && a.resource_id.as_ref() == resource_id
            })
            .map(|a| a.permission.clone())
            .collect()
    }

    fn snapshot_of(&self, stored: &StoredResource, permission: &str) -> AuthorizationSnapshot {
        let resource_id = &stored.resource.id;
        let mut snapshot = AuthorizationSnapshot::new(
            resource_id.clone(),
            stored.authorization_updated_at.unwrap_or(0),
        )
        .with_ancestors(stored.ancestors.clone());

        let grants = self
            .assignments
            .iter()
            .filter(|a| a.resource_id.as_ref() == Some(resource_id) && a.permission == permission);

        for grant in grants {
            match &grant.subject {
                Subject::Anyone => {
                    snapshot.group_names.insert(ANYONE.to_string());
                }
                Subject::Group(group_id) => {
                    if let Some(group) = self.groups.get(group_id) {
                        snapshot.group_names.insert(group.name.clone());
                    }
                }
                Subject::User(user_id) => {
                    if let Some(user) = self.users.get(user_id)
                        && user.active
                    {
                        snapshot.user_logins.insert(user.login.clone());
                    }
                }
            }
        }

        snapshot
    }
}

fn lock(state: &Mutex<InnerState>) -> Result<MutexGuard<'_, InnerState>, StorageError> {
    state
        .lock()
        .map_err(|_| StorageError::Internal("in-memory state lock poisoned".to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionStore for InMemoryStore {
    type Session = InMemorySession;

    async fn open_session(&self) -> Result<InMemorySession, StorageError> {
        let working = lock(&self.state)?.clone();
        Ok(InMemorySession {
            shared: Arc::clone(&self.state),
            working,
            journal: Vec::new(),
        })
    }
}

/// Session over a private copy of the store. Mutations are journaled and
/// replayed onto the shared state on commit.
#[derive(Debug)]
pub struct InMemorySession {
    shared: Arc<Mutex<InnerState>>,
    working: InnerState,
    journal: Vec<(Mutation, usize)>,
}

impl InMemorySession {
    fn record(&mut self, mutation: Mutation) -> usize {
        let affected = self.working.apply(&mutation);
        self.journal.push((mutation, affected));
        affected
    }
}

impl PermissionSession for InMemorySession {
    async fn insert_group(&mut self, group: &Group) -> Result<(), StorageError> {
        let taken = self.working.groups.contains_key(&group.id)
            || self
                .working
                .groups
                .values()
                .any(|g| g.organization_id == group.organization_id && g.name == group.name);
        if taken {
            return Err(StorageError::Duplicate {
                kind: "group",
                id: group.id.to_string(),
            });
        }
        self.record(Mutation::InsertGroup(group.clone()));
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StorageError> {
        let taken = self.working.users.contains_key(&user.id)
            || self.working.users.values().any(|u| u.login == user.login);
        if taken {
            return Err(StorageError::Duplicate {
                kind: "user",
                id: user.id.to_string(),
            });
        }
        self.record(Mutation::InsertUser(user.clone()));
        Ok(())
    }

    async fn insert_resource(&mut self, resource: &Resource) -> Result<(), StorageError> {
        if self.working.resources.contains_key(&resource.id) {
            return Err(StorageError::Duplicate {
                kind: "resource",
                id: resource.id.to_string(),
            });
        }

        let ancestors = match resource.parent_id {
            None => Vec::new(),
            Some(ref parent_id) => {
                let parent = self
                    .working
                    .resources
                    .get(parent_id)
                    .ok_or_else(|| StorageError::ResourceNotFound(parent_id.clone()))?;
                let mut ancestors = parent.ancestors.clone();
                ancestors.push(parent_id.clone());
                ancestors
            }
        };

        self.record(Mutation::InsertResource(StoredResource {
            resource: resource.clone(),
            ancestors,
            authorization_updated_at: None,
            indexed_at: None,
        }));
        Ok(())
    }

    async fn insert_permission(
        &mut self,
        assignment: &PermissionAssignment,
    ) -> Result<bool, StorageError> {
        Ok(self.record(Mutation::InsertPermission(assignment.clone())) > 0)
    }

    async fn delete_permission(
        &mut self,
        assignment: &PermissionAssignment,
    ) -> Result<usize, StorageError> {
        Ok(self.record(Mutation::DeletePermission(assignment.clone())))
    }

    async fn delete_all_for_resource(
        &mut self,
        resource_id: &ResourceId,
    ) -> Result<usize, StorageError> {
        Ok(self.record(Mutation::DeleteResourcePermissions(resource_id.clone())))
    }

    async fn delete_all_for_organization(
        &mut self,
        organization_id: &OrganizationId,
    ) -> Result<usize, StorageError> {
        Ok(self.record(Mutation::DeleteOrganizationPermissions(
            organization_id.clone(),
        )))
    }

    async fn touch_authorization_date(
        &mut self,
        resource_id: &ResourceId,
        at_epoch_millis: i64,
    ) -> Result<(), StorageError> {
        self.record(Mutation::TouchResource(resource_id.clone(), at_epoch_millis));
        Ok(())
    }

    async fn mark_indexed(
        &mut self,
        resource_id: &ResourceId,
        at_epoch_millis: i64,
    ) -> Result<(), StorageError> {
        self.record(Mutation::MarkIndexed(resource_id.clone(), at_epoch_millis));
        Ok(())
    }

    async fn count_subjects(
        &mut self,
        pool: SubjectPool,
        query: &PermissionQuery,
    ) -> Result<usize, StorageError> {
        Ok(self.working.matching_names(pool, query).len())
    }

    async fn list_subject_names(
        &mut self,
        pool: SubjectPool,
        query: &PermissionQuery,
    ) -> Result<Vec<String>, StorageError> {
        Ok(self
            .working
            .matching_names(pool, query)
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .collect())
    }

    async fn permissions_of_group(
        &mut self,
        organization_id: &OrganizationId,
        group_id: Option<&GroupId>,
        resource_id: Option<&ResourceId>,
    ) -> Result<BTreeSet<String>, StorageError> {
        let subject = Subject::group_or_anyone(group_id.cloned());
        Ok(self
            .working
            .permissions_of(organization_id, &subject, resource_id))
    }

    async fn permissions_of_user(
        &mut self,
        organization_id: &OrganizationId,
        user_id: &UserId,
        resource_id: Option<&ResourceId>,
    ) -> Result<BTreeSet<String>, StorageError> {
        let subject = Subject::User(user_id.clone());
        Ok(self
            .working
            .permissions_of(organization_id, &subject, resource_id))
    }

    async fn has_any_permission(&mut self, resource_id: &ResourceId) -> Result<bool, StorageError> {
        Ok(self
            .working
            .assignments
            .iter()
            .any(|a| a.resource_id.as_ref() == Some(resource_id)))
    }

    async fn count_groups_by_resource_and_permission(
        &mut self,
        resource_ids: &[ResourceId],
    ) -> Result<Vec<CountPerResourcePermission>, StorageError> {
        let mut counts: BTreeMap<(ResourceId, String), usize> = BTreeMap::new();
        for assignment in &self.working.assignments {
            if matches!(assignment.subject, Subject::User(_)) {
                continue;
            }
            if let Some(ref resource_id) = assignment.resource_id
                && resource_ids.contains(resource_id)
            {
                *counts
                    .entry((resource_id.clone(), assignment.permission.clone()))
                    .or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|((resource_id, permission), count)| CountPerResourcePermission {
                resource_id,
                permission,
                count,
            })
            .collect())
    }

    async fn group_permissions_by_names(
        &mut self,
        organization_id: &OrganizationId,
        names: &[String],
        resource_id: Option<&ResourceId>,
    ) -> Result<Vec<PermissionAssignment>, StorageError> {
        let subjects: Vec<Subject> = names
            .iter()
            .flat_map(|name| {
                if name == ANYONE {
                    vec![Subject::Anyone]
                } else {
                    self.working
                        .groups
                        .values()
                        .filter(|g| &g.organization_id == organization_id && &g.name == name)
                        .map(|g| Subject::Group(g.id.clone()))
                        .collect()
                }
            })
            .collect();

        Ok(self
            .working
            .assignments
            .iter()
            .filter(|a| {
                &a.organization_id == organization_id
                    && a.resource_id.as_ref() == resource_id
                    && subjects.contains(&a.subject)
            })
            .cloned()
            .collect())
    }

    async fn authorization_snapshots(
        &mut self,
        scope: &SnapshotScope,
        permission: &str,
    ) -> Result<Vec<AuthorizationSnapshot>, StorageError> {
        let state = &self.working;
        let selected: Vec<&StoredResource> = match scope {
            SnapshotScope::WithAnyPermission => state
                .resources
                .values()
                .filter(|r| {
                    state
                        .assignments
                        .iter()
                        .any(|a| a.resource_id.as_ref() == Some(&r.resource.id))
                })
                .collect(),
            SnapshotScope::Resources(ids) => state
                .resources
                .values()
                .filter(|r| ids.contains(&r.resource.id))
                .collect(),
            SnapshotScope::PendingIndex => state
                .resources
                .values()
                .filter(|r| r.index_pending())
                .collect(),
        };

        Ok(selected
            .into_iter()
            .map(|stored| state.snapshot_of(stored, permission))
            .collect())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        let mut shared = lock(&self.shared)?;
        let mut next = shared.clone();
        for (mutation, affected) in self.journal.drain(..) {
            if let Some(conflict) = next.conflict(&mutation, affected) {
                self.working = shared.clone();
                return Err(conflict);
            }
            next.apply(&mutation);
        }
        *shared = next;
        self.working = shared.clone();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.journal.clear();
        self.working = lock(&self.shared)?.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::keys;

    fn org() -> OrganizationId {
        OrganizationId::new("acme")
    }

    fn group_grant(group: &str, permission: &str, resource: Option<&str>) -> PermissionAssignment {
        PermissionAssignment {
            subject: Subject::Group(GroupId::new(group)),
            organization_id: org(),
            permission: permission.to_string(),
            resource_id: resource.map(ResourceId::new),
        }
    }

    fn anyone_grant(permission: &str, resource: Option<&str>) -> PermissionAssignment {
        PermissionAssignment {
            subject: Subject::Anyone,
            organization_id: org(),
            permission: permission.to_string(),
            resource_id: resource.map(ResourceId::new),
        }
    }

    fn user_grant(user: &str, permission: &str, resource: Option<&str>) -> PermissionAssignment {
        PermissionAssignment {
            subject: Subject::User(UserId::new(user)),
            organization_id: org(),
            permission: permission.to_string(),
            resource_id: resource.map(ResourceId::new),
        }
    }

    async fn seeded_session() -> (InMemoryStore, InMemorySession) {
        let store = InMemoryStore::new();
        let mut session = store.open_session().await.unwrap();

        for (id, name) in [("g1", "Group-1"), ("g2", "Group-2"), ("g3", "Group-3")] {
            session
                .insert_group(&Group::new(id, "acme", name))
                .await
                .unwrap();
        }
        session
            .insert_resource(&Resource::root("p1", "acme", "Project 1"))
            .await
            .unwrap();
        session
            .insert_resource(&Resource::root("m1", "acme", "Module 1").child_of("p1"))
            .await
            .unwrap();
        session
            .insert_user(&User::new("u1", "john"))
            .await
            .unwrap();
        session
            .insert_user(&User::new("u2", "alice"))
            .await
            .unwrap();
        session.commit().await.unwrap();

        (store, session)
    }

    // 1. Groups listing puts Anyone in name order with the organization's groups
    #[tokio::test]
    async fn groups_listing_includes_anyone_in_name_order() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&anyone_grant(keys::SCAN_EXECUTION, None))
            .await
            .unwrap();

        let query = PermissionQuery::builder("acme").build().unwrap();
        let names = session
            .list_subject_names(SubjectPool::Groups, &query)
            .await
            .unwrap();

        assert_eq!(names, vec!["Anyone", "Group-1", "Group-2", "Group-3"]);
        assert_eq!(
            session
                .count_subjects(SubjectPool::Groups, &query)
                .await
                .unwrap(),
            4
        );
    }

    // 2. Anyone is left out when it holds nothing in the queried scope
    #[tokio::test]
    async fn anyone_is_omitted_without_matching_permission() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&anyone_grant(keys::USER, Some("p1")))
            .await
            .unwrap();

        let query = PermissionQuery::builder("acme").build().unwrap();
        let names = session
            .list_subject_names(SubjectPool::Groups, &query)
            .await
            .unwrap();

        assert_eq!(names, vec!["Group-1", "Group-2", "Group-3"]);
    }

    // 3. Pages are cut after sorting
    #[tokio::test]
    async fn groups_listing_is_paginated() {
        let store = InMemoryStore::new();
        let mut session = store.open_session().await.unwrap();
        for i in 0..10 {
            session
                .insert_group(&Group::new(format!("g{i}"), "acme", format!("{i}-name")))
                .await
                .unwrap();
        }

        let query = PermissionQuery::builder("acme").page(2, 3).build().unwrap();
        let names = session
            .list_subject_names(SubjectPool::Groups, &query)
            .await
            .unwrap();

        assert_eq!(names, vec!["3-name", "4-name", "5-name"]);
        assert_eq!(
            session
                .count_subjects(SubjectPool::Groups, &query)
                .await
                .unwrap(),
            10
        );
    }

    // 4. Exact permission filter respects strict scope
    #[tokio::test]
    async fn permission_filter_is_strict_on_scope() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::ADMIN, None))
            .await
            .unwrap();
        session
            .insert_permission(&group_grant("g2", keys::ADMIN, Some("p1")))
            .await
            .unwrap();

        let global = PermissionQuery::builder("acme")
            .permission(keys::ADMIN)
            .build()
            .unwrap();
        let scoped = PermissionQuery::builder("acme")
            .permission(keys::ADMIN)
            .resource("p1")
            .build()
            .unwrap();

        assert_eq!(
            session
                .list_subject_names(SubjectPool::Groups, &global)
                .await
                .unwrap(),
            vec!["Group-1"]
        );
        assert_eq!(
            session
                .list_subject_names(SubjectPool::Groups, &scoped)
                .await
                .unwrap(),
            vec!["Group-2"]
        );
    }

    // 5. At-least-one filter keeps subjects holding any key in scope
    #[tokio::test]
    async fn at_least_one_filter_keeps_holders_only() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g3", keys::CODEVIEWER, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&user_grant("u1", keys::USER, Some("p1")))
            .await
            .unwrap();

        let query = PermissionQuery::builder("acme")
            .resource("p1")
            .with_at_least_one_permission()
            .build()
            .unwrap();

        assert_eq!(
            session
                .list_subject_names(SubjectPool::Groups, &query)
                .await
                .unwrap(),
            vec!["Group-3"]
        );
        assert_eq!(
            session
                .list_subject_names(SubjectPool::Users, &query)
                .await
                .unwrap(),
            vec!["john"]
        );
    }

    // 6. Search matches case-insensitively, Anyone included
    #[tokio::test]
    async fn search_is_case_insensitive() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&anyone_grant(keys::USER, None))
            .await
            .unwrap();

        let query = PermissionQuery::builder("acme")
            .search("ANY")
            .build()
            .unwrap();

        assert_eq!(
            session
                .list_subject_names(SubjectPool::Groups, &query)
                .await
                .unwrap(),
            vec!["Anyone"]
        );
    }

    // 7. Users listing skips deactivated users
    #[tokio::test]
    async fn users_listing_skips_inactive_users() {
        let (_store, mut session) = seeded_session().await;
        let mut ghost = User::new("u3", "ghost");
        ghost.active = false;
        session.insert_user(&ghost).await.unwrap();

        let query = PermissionQuery::builder("acme").build().unwrap();

        assert_eq!(
            session
                .list_subject_names(SubjectPool::Users, &query)
                .await
                .unwrap(),
            vec!["alice", "john"]
        );
    }

    // 8. Duplicate permission insert has no effect
    #[tokio::test]
    async fn duplicate_insert_is_a_noop() {
        let (_store, mut session) = seeded_session().await;
        let grant = group_grant("g1", keys::USER, Some("p1"));

        assert!(session.insert_permission(&grant).await.unwrap());
        assert!(!session.insert_permission(&grant).await.unwrap());
    }

    // 9. Single delete removes only the exact coordinates
    #[tokio::test]
    async fn delete_removes_exact_row_only() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::USER, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&group_grant("g1", keys::USER, None))
            .await
            .unwrap();

        let removed = session
            .delete_permission(&group_grant("g1", keys::USER, Some("p1")))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let global = session
            .permissions_of_group(&org(), Some(&GroupId::new("g1")), None)
            .await
            .unwrap();
        let scoped = session
            .permissions_of_group(&org(), Some(&GroupId::new("g1")), Some(&ResourceId::new("p1")))
            .await
            .unwrap();
        assert_eq!(global, BTreeSet::from(["user".to_string()]));
        assert!(scoped.is_empty());
    }

    // 10. Resource purge clears group, Anyone and user rows
    #[tokio::test]
    async fn delete_all_for_resource_clears_every_subject_kind() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::USER, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&anyone_grant(keys::USER, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&user_grant("u1", keys::ADMIN, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&group_grant("g1", keys::USER, None))
            .await
            .unwrap();
        let p1 = ResourceId::new("p1");

        assert!(session.has_any_permission(&p1).await.unwrap());
        assert_eq!(session.delete_all_for_resource(&p1).await.unwrap(), 3);
        assert!(!session.has_any_permission(&p1).await.unwrap());
    }

    // 11. Uncommitted writes stay private to the session
    #[tokio::test]
    async fn uncommitted_writes_are_isolated() {
        let (store, mut writer) = seeded_session().await;
        writer
            .insert_permission(&group_grant("g1", keys::USER, Some("p1")))
            .await
            .unwrap();

        let mut reader = store.open_session().await.unwrap();
        let p1 = ResourceId::new("p1");
        assert!(!reader.has_any_permission(&p1).await.unwrap());

        writer.commit().await.unwrap();
        let mut reader = store.open_session().await.unwrap();
        assert!(reader.has_any_permission(&p1).await.unwrap());
    }

    // 12. Rollback discards pending writes
    #[tokio::test]
    async fn rollback_discards_pending_writes() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::USER, Some("p1")))
            .await
            .unwrap();

        session.rollback().await.unwrap();

        assert!(
            !session
                .has_any_permission(&ResourceId::new("p1"))
                .await
                .unwrap()
        );
    }

    // 13. Snapshots carry browse grants, ancestry and authorization date
    #[tokio::test]
    async fn snapshot_reads_browse_grants() {
        let (_store, mut session) = seeded_session().await;
        let m1 = ResourceId::new("m1");
        session
            .insert_permission(&group_grant("g1", keys::USER, Some("m1")))
            .await
            .unwrap();
        session
            .insert_permission(&anyone_grant(keys::USER, Some("m1")))
            .await
            .unwrap();
        session
            .insert_permission(&user_grant("u1", keys::USER, Some("m1")))
            .await
            .unwrap();
        session
            .insert_permission(&group_grant("g2", keys::ADMIN, Some("m1")))
            .await
            .unwrap();
        session.touch_authorization_date(&m1, 1_000).await.unwrap();

        let snapshots = session
            .authorization_snapshots(&SnapshotScope::Resources(vec![m1.clone()]), keys::USER)
            .await
            .unwrap();

        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.ancestors, vec![ResourceId::new("p1")]);
        assert_eq!(
            snapshot.group_names,
            BTreeSet::from(["Anyone".to_string(), "Group-1".to_string()])
        );
        assert_eq!(snapshot.user_logins, BTreeSet::from(["john".to_string()]));
        assert_eq!(snapshot.updated_at, 1_000);
    }

    // 14. Snapshot scopes select resources by permission rows or timestamp
    #[tokio::test]
    async fn snapshot_scopes_select_resources() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::ADMIN, Some("p1")))
            .await
            .unwrap();
        session
            .touch_authorization_date(&ResourceId::new("m1"), 500)
            .await
            .unwrap();

        let with_rows = session
            .authorization_snapshots(&SnapshotScope::WithAnyPermission, keys::USER)
            .await
            .unwrap();
        assert_eq!(with_rows.len(), 1);
        assert_eq!(with_rows[0].resource_id, ResourceId::new("p1"));
        assert!(with_rows[0].is_empty());

        let pending = session
            .authorization_snapshots(&SnapshotScope::PendingIndex, keys::USER)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resource_id, ResourceId::new("m1"));
        assert_eq!(pending[0].updated_at, 500);
    }

    // 15. Group rows are counted per resource and permission
    #[tokio::test]
    async fn counts_groups_per_resource_and_permission() {
        let (_store, mut session) = seeded_session().await;
        for grant in [
            group_grant("g1", keys::USER, Some("p1")),
            group_grant("g2", keys::USER, Some("p1")),
            anyone_grant(keys::USER, Some("p1")),
            group_grant("g1", keys::ADMIN, Some("p1")),
            group_grant("g1", keys::USER, Some("m1")),
            user_grant("u1", keys::USER, Some("p1")),
        ] {
            session.insert_permission(&grant).await.unwrap();
        }

        let counts = session
            .count_groups_by_resource_and_permission(&[ResourceId::new("p1")])
            .await
            .unwrap();

        assert_eq!(
            counts,
            vec![
                CountPerResourcePermission {
                    resource_id: ResourceId::new("p1"),
                    permission: "admin".to_string(),
                    count: 1,
                },
                CountPerResourcePermission {
                    resource_id: ResourceId::new("p1"),
                    permission: "user".to_string(),
                    count: 3,
                },
            ]
        );
    }

    // 16. Group rows can be looked up by group name
    #[tokio::test]
    async fn group_permissions_resolve_names() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::USER, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&anyone_grant(keys::CODEVIEWER, Some("p1")))
            .await
            .unwrap();
        session
            .insert_permission(&group_grant("g2", keys::USER, Some("p1")))
            .await
            .unwrap();

        let rows = session
            .group_permissions_by_names(
                &org(),
                &["Group-1".to_string(), "Anyone".to_string()],
                Some(&ResourceId::new("p1")),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&group_grant("g1", keys::USER, Some("p1"))));
        assert!(rows.contains(&anyone_grant(keys::CODEVIEWER, Some("p1"))));
    }

    // 17. Organization purge leaves other organizations alone
    #[tokio::test]
    async fn organization_purge_is_scoped() {
        let (_store, mut session) = seeded_session().await;
        session
            .insert_permission(&group_grant("g1", keys::USER, None))
            .await
            .unwrap();
        let mut other = group_grant("g1", keys::USER, None);
        other.organization_id = OrganizationId::new("globex");
        session.insert_permission(&other).await.unwrap();

        assert_eq!(session.delete_all_for_organization(&org()).await.unwrap(), 1);
        let remaining = session
            .permissions_of_group(&OrganizationId::new("globex"), Some(&GroupId::new("g1")), None)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    // 18. Registry inserts reject duplicates and unknown parents
    #[tokio::test]
    async fn registry_inserts_are_validated() {
        let (_store, mut session) = seeded_session().await;

        let err = session
            .insert_group(&Group::new("g9", "acme", "Group-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { kind: "group", .. }));

        let err = session
            .insert_resource(&Resource::root("x", "acme", "orphan").child_of("nope"))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::ResourceNotFound(ResourceId::new("nope")));
    }

    // 19. Marking a resource indexed clears it from the pending scope until
    // the next touch, and an older mark never undoes a newer one
    #[tokio::test]
    async fn mark_indexed_tracks_pending_resources() {
        let (_store, mut session) = seeded_session().await;
        let m1 = ResourceId::new("m1");
        session.touch_authorization_date(&m1, 500).await.unwrap();
        session.mark_indexed(&m1, 500).await.unwrap();

        let pending = session
            .authorization_snapshots(&SnapshotScope::PendingIndex, keys::USER)
            .await
            .unwrap();
        assert!(pending.is_empty());

        session.touch_authorization_date(&m1, 600).await.unwrap();
        session.mark_indexed(&m1, 400).await.unwrap();
        session.commit().await.unwrap();

        let pending = session
            .authorization_snapshots(&SnapshotScope::PendingIndex, keys::USER)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].updated_at, 600);
    }

    // 20. Two sessions adding the same row: the second commit is rejected
    // and exactly one row lands
    #[tokio::test]
    async fn concurrent_duplicate_insert_fails_on_commit() {
        let (store, _session) = seeded_session().await;
        let grant = user_grant("u1", keys::USER, Some("p1"));

        let mut first = store.open_session().await.unwrap();
        let mut second = store.open_session().await.unwrap();
        assert!(first.insert_permission(&grant).await.unwrap());
        assert!(second.insert_permission(&grant).await.unwrap());

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { kind: "permission", .. }));

        let mut check = store.open_session().await.unwrap();
        let rows = check
            .permissions_of_user(&org(), &UserId::new("u1"), Some(&ResourceId::new("p1")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(second.has_any_permission(&ResourceId::new("p1")).await.unwrap());
    }
}
