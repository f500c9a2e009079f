use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        id              TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        name            TEXT NOT NULL,
        UNIQUE (organization_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id      TEXT PRIMARY KEY,
        login   TEXT NOT NULL UNIQUE,
        name    TEXT NOT NULL,
        active  BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resources (
        id                       TEXT PRIMARY KEY,
        organization_id          TEXT NOT NULL,
        parent_id                TEXT REFERENCES resources(id),
        ancestors                TEXT[] NOT NULL DEFAULT '{}',
        name                     TEXT NOT NULL,
        authorization_updated_at BIGINT,
        indexed_at               BIGINT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_permissions (
        id              BIGSERIAL PRIMARY KEY,
        organization_id TEXT NOT NULL,
        group_id        TEXT REFERENCES groups(id) ON DELETE CASCADE,
        resource_id     TEXT,
        permission      TEXT NOT NULL,
        UNIQUE NULLS NOT DISTINCT (organization_id, group_id, resource_id, permission)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_permissions (
        id              BIGSERIAL PRIMARY KEY,
        organization_id TEXT NOT NULL,
        user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        resource_id     TEXT,
        permission      TEXT NOT NULL,
        UNIQUE NULLS NOT DISTINCT (organization_id, user_id, resource_id, permission)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_group_permissions_resource ON group_permissions (resource_id)",
    "CREATE INDEX IF NOT EXISTS idx_user_permissions_resource ON user_permissions (resource_id)",
    "CREATE INDEX IF NOT EXISTS idx_resources_authorization_updated_at ON resources (authorization_updated_at)",
];

/// Creates the permission tables. Safe to run repeatedly.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = STATEMENTS.len(), "permission schema migrated");
    Ok(())
}
