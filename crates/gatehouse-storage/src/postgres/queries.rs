use std::collections::{BTreeMap, BTreeSet};

use sqlx::PgConnection;

use gatehouse_core::{
    ANYONE, AuthorizationSnapshot, Group, GroupId, OrganizationId, PermissionAssignment,
    PermissionPredicate, PermissionQuery, Resource, ResourceId, Subject, SubjectPool, User, UserId,
};

use crate::traits::{CountPerResourcePermission, SnapshotScope, StorageError};

pub(crate) fn to_storage_error(e: sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn duplicate_or_internal(e: sqlx::Error, kind: &'static str, id: &str) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StorageError::Duplicate {
            kind,
            id: id.to_string(),
        };
    }
    to_storage_error(e)
}

fn to_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

/// Positional text parameters for dynamically assembled statements.
#[derive(Debug, Default)]
struct Params(Vec<String>);

impl Params {
    fn push(&mut self, value: &str) -> String {
        self.0.push(value.to_string());
        format!("${}::text", self.0.len())
    }
}

fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn grant_condition(alias: &str, org: &str, query: &PermissionQuery, params: &mut Params) -> String {
    let mut condition = format!("{alias}.organization_id = {org}");
    match query.resource_id {
        Some(ref resource_id) => {
            let placeholder = params.push(resource_id.as_str());
            condition.push_str(&format!(" AND {alias}.resource_id = {placeholder}"));
        }
        None => condition.push_str(&format!(" AND {alias}.resource_id IS NULL")),
    }
    if let PermissionPredicate::Exactly(permission) = query.predicate() {
        let placeholder = params.push(permission);
        condition.push_str(&format!(" AND {alias}.permission = {placeholder}"));
    }
    condition
}

fn subjects_sql(pool: SubjectPool, query: &PermissionQuery, params: &mut Params) -> String {
    let by_permission = query.predicate() != PermissionPredicate::Any;

    let subjects = match pool {
        SubjectPool::Groups => {
            let org = params.push(query.organization_id.as_str());
            let mut groups =
                format!("SELECT g.name AS name FROM groups g WHERE g.organization_id = {org}");
            if by_permission {
                let condition = grant_condition("gp", &org, query, params);
                groups.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM group_permissions gp WHERE gp.group_id = g.id AND {condition})"
                ));
            }
            let condition = grant_condition("gp", &org, query, params);
            format!(
                "{groups} UNION ALL SELECT '{ANYONE}' AS name WHERE EXISTS \
                 (SELECT 1 FROM group_permissions gp WHERE gp.group_id IS NULL AND {condition})"
            )
        }
        SubjectPool::Users => {
            let mut users = "SELECT u.login AS name FROM users u WHERE u.active".to_string();
            if by_permission {
                let org = params.push(query.organization_id.as_str());
                let condition = grant_condition("up", &org, query, params);
                users.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM user_permissions up WHERE up.user_id = u.id AND {condition})"
                ));
            }
            users
        }
    };

    let mut sql = format!("SELECT name FROM ({subjects}) subjects");
    if let Some(ref search) = query.search_query {
        let placeholder = params.push(&like_pattern(search));
        sql.push_str(&format!(" WHERE LOWER(name) LIKE {placeholder}"));
    }
    sql
}

pub async fn count_subjects(
    conn: &mut PgConnection,
    pool: SubjectPool,
    query: &PermissionQuery,
) -> Result<usize, StorageError> {
    let mut params = Params::default();
    let sql = format!(
        "SELECT COUNT(*) FROM ({}) matched",
        subjects_sql(pool, query, &mut params)
    );

    let mut statement = sqlx::query_as::<_, (i64,)>(&sql);
    for value in &params.0 {
        statement = statement.bind(value.as_str());
    }
    let row = statement
        .fetch_one(conn)
        .await
        .map_err(to_storage_error)?;
    Ok(to_count(row.0))
}

pub async fn list_subject_names(
    conn: &mut PgConnection,
    pool: SubjectPool,
    query: &PermissionQuery,
) -> Result<Vec<String>, StorageError> {
    let mut params = Params::default();
    let sql = format!(
        r#"{} ORDER BY name COLLATE "C" LIMIT {} OFFSET {}"#,
        subjects_sql(pool, query, &mut params),
        query.limit(),
        i64::try_from(query.offset()).unwrap_or(i64::MAX)
    );

    let mut statement = sqlx::query_as::<_, (String,)>(&sql);
    for value in &params.0 {
        statement = statement.bind(value.as_str());
    }
    let rows = statement
        .fetch_all(conn)
        .await
        .map_err(to_storage_error)?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn insert_group(conn: &mut PgConnection, group: &Group) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO groups (id, organization_id, name) VALUES ($1, $2, $3)")
        .bind(group.id.as_str())
        .bind(group.organization_id.as_str())
        .bind(&group.name)
        .execute(conn)
        .await
        .map_err(|e| duplicate_or_internal(e, "group", group.id.as_str()))?;
    Ok(())
}

pub async fn insert_user(conn: &mut PgConnection, user: &User) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO users (id, login, name, active) VALUES ($1, $2, $3, $4)")
        .bind(user.id.as_str())
        .bind(&user.login)
        .bind(&user.name)
        .bind(user.active)
        .execute(conn)
        .await
        .map_err(|e| duplicate_or_internal(e, "user", user.id.as_str()))?;
    Ok(())
}

pub async fn insert_resource(
    conn: &mut PgConnection,
    resource: &Resource,
) -> Result<(), StorageError> {
    let ancestors = match resource.parent_id {
        None => Vec::new(),
        Some(ref parent_id) => {
            let row: Option<(Vec<String>,)> =
                sqlx::query_as("SELECT ancestors FROM resources WHERE id = $1")
                    .bind(parent_id.as_str())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(to_storage_error)?;
            let (parent_ancestors,) =
                row.ok_or_else(|| StorageError::ResourceNotFound(parent_id.clone()))?;
            child_ancestors(parent_ancestors, parent_id)
        }
    };

    sqlx::query(
        "INSERT INTO resources (id, organization_id, parent_id, ancestors, name) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(resource.id.as_str())
    .bind(resource.organization_id.as_str())
    .bind(resource.parent_id.as_ref().map(ResourceId::as_str))
    .bind(&ancestors)
    .bind(&resource.name)
    .execute(conn)
    .await
    .map_err(|e| duplicate_or_internal(e, "resource", resource.id.as_str()))?;
    Ok(())
}

/// Ancestor ids of a new child, root first. Ids are kept as whole array
/// elements, so any character may appear in them.
fn child_ancestors(mut parent_ancestors: Vec<String>, parent_id: &ResourceId) -> Vec<String> {
    parent_ancestors.push(parent_id.to_string());
    parent_ancestors
}

pub async fn insert_permission(
    conn: &mut PgConnection,
    assignment: &PermissionAssignment,
) -> Result<bool, StorageError> {
    let resource_id = assignment.resource_id.as_ref().map(ResourceId::as_str);
    let result = match assignment.subject {
        Subject::User(ref user_id) => {
            sqlx::query(
                "INSERT INTO user_permissions (organization_id, user_id, resource_id, permission) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(assignment.organization_id.as_str())
            .bind(user_id.as_str())
            .bind(resource_id)
            .bind(&assignment.permission)
            .execute(conn)
            .await
        }
        Subject::Group(_) | Subject::Anyone => {
            sqlx::query(
                "INSERT INTO group_permissions (organization_id, group_id, resource_id, permission) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(assignment.organization_id.as_str())
            .bind(assignment.subject.id())
            .bind(resource_id)
            .bind(&assignment.permission)
            .execute(conn)
            .await
        }
    }
    .map_err(to_storage_error)?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_permission(
    conn: &mut PgConnection,
    assignment: &PermissionAssignment,
) -> Result<usize, StorageError> {
    let resource_id = assignment.resource_id.as_ref().map(ResourceId::as_str);
    let result = match assignment.subject {
        Subject::User(ref user_id) => {
            sqlx::query(
                "DELETE FROM user_permissions WHERE organization_id = $1 AND user_id = $2 \
                 AND resource_id IS NOT DISTINCT FROM $3::text AND permission = $4",
            )
            .bind(assignment.organization_id.as_str())
            .bind(user_id.as_str())
            .bind(resource_id)
            .bind(&assignment.permission)
            .execute(conn)
            .await
        }
        Subject::Group(_) | Subject::Anyone => {
            sqlx::query(
                "DELETE FROM group_permissions WHERE organization_id = $1 \
                 AND group_id IS NOT DISTINCT FROM $2::text \
                 AND resource_id IS NOT DISTINCT FROM $3::text AND permission = $4",
            )
            .bind(assignment.organization_id.as_str())
            .bind(assignment.subject.id())
            .bind(resource_id)
            .bind(&assignment.permission)
            .execute(conn)
            .await
        }
    }
    .map_err(to_storage_error)?;

    Ok(usize::try_from(result.rows_affected()).unwrap_or_default())
}

async fn delete_where(
    conn: &mut PgConnection,
    column: &str,
    value: &str,
) -> Result<usize, StorageError> {
    let mut removed = 0;
    for table in ["group_permissions", "user_permissions"] {
        let sql = format!("DELETE FROM {table} WHERE {column} = $1");
        let result = sqlx::query(&sql)
            .bind(value)
            .execute(&mut *conn)
            .await
            .map_err(to_storage_error)?;
        removed += usize::try_from(result.rows_affected()).unwrap_or_default();
    }
    Ok(removed)
}

pub async fn delete_all_for_resource(
    conn: &mut PgConnection,
    resource_id: &ResourceId,
) -> Result<usize, StorageError> {
    delete_where(conn, "resource_id", resource_id.as_str()).await
}

pub async fn delete_all_for_organization(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
) -> Result<usize, StorageError> {
    delete_where(conn, "organization_id", organization_id.as_str()).await
}

pub async fn touch_authorization_date(
    conn: &mut PgConnection,
    resource_id: &ResourceId,
    at_epoch_millis: i64,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE resources SET authorization_updated_at = $2 WHERE id = $1")
        .bind(resource_id.as_str())
        .bind(at_epoch_millis)
        .execute(conn)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

pub async fn mark_indexed(
    conn: &mut PgConnection,
    resource_id: &ResourceId,
    at_epoch_millis: i64,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE resources SET indexed_at = GREATEST(indexed_at, $2) WHERE id = $1")
        .bind(resource_id.as_str())
        .bind(at_epoch_millis)
        .execute(conn)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

pub async fn permissions_of_group(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    group_id: Option<&GroupId>,
    resource_id: Option<&ResourceId>,
) -> Result<BTreeSet<String>, StorageError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT permission FROM group_permissions WHERE organization_id = $1 \
         AND group_id IS NOT DISTINCT FROM $2::text \
         AND resource_id IS NOT DISTINCT FROM $3::text",
    )
    .bind(organization_id.as_str())
    .bind(group_id.map(GroupId::as_str))
    .bind(resource_id.map(ResourceId::as_str))
    .fetch_all(conn)
    .await
    .map_err(to_storage_error)?;

    Ok(rows.into_iter().map(|(permission,)| permission).collect())
}

pub async fn permissions_of_user(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    user_id: &UserId,
    resource_id: Option<&ResourceId>,
) -> Result<BTreeSet<String>, StorageError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT permission FROM user_permissions WHERE organization_id = $1 AND user_id = $2 \
         AND resource_id IS NOT DISTINCT FROM $3::text",
    )
    .bind(organization_id.as_str())
    .bind(user_id.as_str())
    .bind(resource_id.map(ResourceId::as_str))
    .fetch_all(conn)
    .await
    .map_err(to_storage_error)?;

    Ok(rows.into_iter().map(|(permission,)| permission).collect())
}

pub async fn has_any_permission(
    conn: &mut PgConnection,
    resource_id: &ResourceId,
) -> Result<bool, StorageError> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM group_permissions WHERE resource_id = $1) \
         OR EXISTS (SELECT 1 FROM user_permissions WHERE resource_id = $1)",
    )
    .bind(resource_id.as_str())
    .fetch_one(conn)
    .await
    .map_err(to_storage_error)?;
    Ok(row.0)
}

pub async fn count_groups_by_resource_and_permission(
    conn: &mut PgConnection,
    resource_ids: &[ResourceId],
) -> Result<Vec<CountPerResourcePermission>, StorageError> {
    if resource_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = resource_ids.iter().map(ToString::to_string).collect();

    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        r#"
        SELECT resource_id, permission, COUNT(*)
        FROM group_permissions
        WHERE resource_id = ANY($1)
        GROUP BY resource_id, permission
        ORDER BY resource_id COLLATE "C", permission COLLATE "C"
        "#,
    )
    .bind(ids)
    .fetch_all(conn)
    .await
    .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(resource_id, permission, count)| CountPerResourcePermission {
            resource_id: ResourceId::new(resource_id),
            permission,
            count: to_count(count),
        })
        .collect())
}

pub async fn group_permissions_by_names(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    names: &[String],
    resource_id: Option<&ResourceId>,
) -> Result<Vec<PermissionAssignment>, StorageError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let includes_anyone = names.iter().any(|name| name == ANYONE);

    let rows: Vec<(Option<String>, String)> = sqlx::query_as(
        r#"
        SELECT gp.group_id, gp.permission
        FROM group_permissions gp
        LEFT JOIN groups g ON g.id = gp.group_id
        WHERE gp.organization_id = $1
          AND gp.resource_id IS NOT DISTINCT FROM $2::text
          AND (g.name = ANY($3) OR (gp.group_id IS NULL AND $4))
        "#,
    )
    .bind(organization_id.as_str())
    .bind(resource_id.map(ResourceId::as_str))
    .bind(names.to_vec())
    .bind(includes_anyone)
    .fetch_all(conn)
    .await
    .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(group_id, permission)| PermissionAssignment {
            subject: Subject::group_or_anyone(group_id.map(GroupId::new)),
            organization_id: organization_id.clone(),
            permission,
            resource_id: resource_id.cloned(),
        })
        .collect())
}

const SNAPSHOT_RESOURCES_WITH_PERMISSION: &str = r#"
    SELECT r.id, r.ancestors, COALESCE(r.authorization_updated_at, 0)
    FROM resources r
    WHERE EXISTS (SELECT 1 FROM group_permissions gp WHERE gp.resource_id = r.id)
       OR EXISTS (SELECT 1 FROM user_permissions up WHERE up.resource_id = r.id)
"#;

const SNAPSHOT_RESOURCES_BY_ID: &str = r#"
    SELECT r.id, r.ancestors, COALESCE(r.authorization_updated_at, 0)
    FROM resources r
    WHERE r.id = ANY($1)
"#;

const SNAPSHOT_RESOURCES_PENDING_INDEX: &str = r#"
    SELECT r.id, r.ancestors, COALESCE(r.authorization_updated_at, 0)
    FROM resources r
    WHERE r.authorization_updated_at IS NOT NULL
      AND (r.indexed_at IS NULL OR r.indexed_at < r.authorization_updated_at)
"#;

pub async fn authorization_snapshots(
    conn: &mut PgConnection,
    scope: &SnapshotScope,
    permission: &str,
) -> Result<Vec<AuthorizationSnapshot>, StorageError> {
    let resources: Vec<(String, Vec<String>, i64)> = match scope {
        SnapshotScope::WithAnyPermission => {
            sqlx::query_as(SNAPSHOT_RESOURCES_WITH_PERMISSION)
                .fetch_all(&mut *conn)
                .await
        }
        SnapshotScope::Resources(ids) => {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            sqlx::query_as(SNAPSHOT_RESOURCES_BY_ID)
                .bind(ids)
                .fetch_all(&mut *conn)
                .await
        }
        SnapshotScope::PendingIndex => {
            sqlx::query_as(SNAPSHOT_RESOURCES_PENDING_INDEX)
                .fetch_all(&mut *conn)
                .await
        }
    }
    .map_err(to_storage_error)?;

    if resources.is_empty() {
        return Ok(Vec::new());
    }

    let mut snapshots: BTreeMap<String, AuthorizationSnapshot> = resources
        .into_iter()
        .map(|(id, ancestors, updated_at)| {
            let snapshot = AuthorizationSnapshot::new(id.clone(), updated_at)
                .with_ancestors(ancestors.into_iter().map(ResourceId::new).collect());
            (id, snapshot)
        })
        .collect();
    let ids: Vec<String> = snapshots.keys().cloned().collect();

    let groups: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT gp.resource_id, COALESCE(g.name, $3)
        FROM group_permissions gp
        LEFT JOIN groups g ON g.id = gp.group_id
        WHERE gp.permission = $1 AND gp.resource_id = ANY($2)
        "#,
    )
    .bind(permission)
    .bind(ids.clone())
    .bind(ANYONE)
    .fetch_all(&mut *conn)
    .await
    .map_err(to_storage_error)?;

    let users: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT up.resource_id, u.login
        FROM user_permissions up
        JOIN users u ON u.id = up.user_id
        WHERE u.active AND up.permission = $1 AND up.resource_id = ANY($2)
        "#,
    )
    .bind(permission)
    .bind(ids)
    .fetch_all(conn)
    .await
    .map_err(to_storage_error)?;

    for (resource_id, name) in groups {
        if let Some(snapshot) = snapshots.get_mut(&resource_id) {
            snapshot.group_names.insert(name);
        }
    }
    for (resource_id, login) in users {
        if let Some(snapshot) = snapshots.get_mut(&resource_id) {
            snapshot.user_logins.insert(login);
        }
    }

    Ok(snapshots.into_values().collect())
}
