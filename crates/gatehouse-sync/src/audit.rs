use gatehouse_core::{PermissionChange, ResourceId};

pub fn audit_permission_change(change: &PermissionChange, changed: bool) {
    let resource_id = change.resource_id().map(ResourceId::as_str).unwrap_or("");
    tracing::info!(
        target: "audit",
        event = "permission_change",
        operation = %change.operation(),
        organization_id = %change.organization_id(),
        subject = %change.subject(),
        permission = change.permission(),
        resource_id = resource_id,
        changed = changed,
        "permission change applied"
    );
}

pub fn audit_reindex(scope: &str, document_count: usize) {
    tracing::info!(
        target: "audit",
        event = "reindex",
        scope = scope,
        document_count = document_count,
        "authorization index rebuilt"
    );
}

pub fn audit_resource_deletion(resource_id: &ResourceId, with_descendants: bool, removed: usize) {
    tracing::info!(
        target: "audit",
        event = "resource_delete",
        resource_id = %resource_id,
        with_descendants = with_descendants,
        removed = removed,
        "authorization documents deleted"
    );
}
