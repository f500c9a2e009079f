use crate::ids::{OrganizationId, ResourceId};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const SEARCH_QUERY_MIN_LENGTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("page index must be strictly positive, got {0}")]
    InvalidPageIndex(usize),
    #[error("page size must be strictly positive, got {0}")]
    InvalidPageSize(usize),
    #[error("search query should contain at least {} characters", SEARCH_QUERY_MIN_LENGTH)]
    SearchQueryTooShort,
}

/// Which family of subjects a listing walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectPool {
    /// Groups of the organization, plus Anyone when it holds a matching permission.
    Groups,
    /// Active users.
    Users,
}

/// Permission predicate after resolving the precedence between an exact
/// permission key and the "at least one" flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPredicate<'a> {
    Any,
    AtLeastOne,
    Exactly(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionQuery {
    pub organization_id: OrganizationId,
    pub permission: Option<String>,
    pub with_at_least_one_permission: bool,
    pub resource_id: Option<ResourceId>,
    pub search_query: Option<String>,
    pub page_index: usize,
    pub page_size: usize,
}

impl PermissionQuery {
    pub fn builder(organization_id: impl Into<OrganizationId>) -> PermissionQueryBuilder {
        PermissionQueryBuilder {
            organization_id: organization_id.into(),
            permission: None,
            with_at_least_one_permission: false,
            resource_id: None,
            search_query: None,
            page_index: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn predicate(&self) -> PermissionPredicate<'_> {
        match (&self.permission, self.with_at_least_one_permission) {
            (Some(permission), _) => PermissionPredicate::Exactly(permission),
            (None, true) => PermissionPredicate::AtLeastOne,
            (None, false) => PermissionPredicate::Any,
        }
    }

    /// Rows to skip. Saturates, so a hand-built query with page index 0 or
    /// a huge page index still yields a usable value.
    pub fn offset(&self) -> usize {
        self.page_index.saturating_sub(1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> usize {
        self.page_size
    }

    /// Case-insensitive substring match against the search query.
    pub fn matches_name(&self, name: &str) -> bool {
        match self.search_query {
            None => true,
            Some(ref q) => name.to_lowercase().contains(&q.to_lowercase()),
        }
    }

    /// Returns true when a permission row with the given key and scope
    /// satisfies this query's scope and predicate.
    pub fn matches_permission(&self, permission: &str, resource_id: Option<&ResourceId>) -> bool {
        if resource_id != self.resource_id.as_ref() {
            return false;
        }
        match self.predicate() {
            PermissionPredicate::Any | PermissionPredicate::AtLeastOne => true,
            PermissionPredicate::Exactly(key) => key == permission,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PermissionQueryBuilder {
    organization_id: OrganizationId,
    permission: Option<String>,
    with_at_least_one_permission: bool,
    resource_id: Option<ResourceId>,
    search_query: Option<String>,
    page_index: usize,
    page_size: usize,
}

impl PermissionQueryBuilder {
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn with_at_least_one_permission(mut self) -> Self {
        self.with_at_least_one_permission = true;
        self
    }

    pub fn resource(mut self, resource_id: impl Into<ResourceId>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search_query = Some(query.into());
        self
    }

    pub fn page(mut self, index: usize, size: usize) -> Self {
        self.page_index = index;
        self.page_size = size;
        self
    }

    pub fn build(self) -> Result<PermissionQuery, QueryError> {
        if self.page_index == 0 {
            return Err(QueryError::InvalidPageIndex(self.page_index));
        }
        if self.page_size == 0 {
            return Err(QueryError::InvalidPageSize(self.page_size));
        }
        if let Some(ref q) = self.search_query
            && q.chars().count() < SEARCH_QUERY_MIN_LENGTH
        {
            return Err(QueryError::SearchQueryTooShort);
        }

        Ok(PermissionQuery {
            organization_id: self.organization_id,
            permission: self.permission,
            with_at_least_one_permission: self.with_at_least_one_permission,
            resource_id: self.resource_id,
            search_query: self.search_query,
            page_index: self.page_index,
            page_size: self.page_size,
        })
    }
}
