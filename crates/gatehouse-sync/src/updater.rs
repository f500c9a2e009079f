use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gatehouse_core::{PermissionChange, ResourceId};
use gatehouse_index::SearchIndex;
use gatehouse_storage::{PermissionSession, PermissionStore, StorageError};

use crate::audit;
use crate::changer::{GroupPermissionChanger, UserPermissionChanger};
use crate::error::SyncError;
use crate::indexer::AuthorizationIndexer;
use crate::metrics::Metrics;

/// Applies permission changes and pushes the affected resource to the
/// search index.
///
/// The store is the source of truth. The permission change is committed
/// before the index is touched, so any failure past that point leaves the
/// change in place and is reported with [`SyncError::requires_reindex`]
/// set. Index writes for one resource are not queued: concurrent updates
/// of the same resource are last-write-wins at the index.
pub struct PermissionUpdater<P, I> {
    indexer: Arc<AuthorizationIndexer<P, I>>,
    user_changer: UserPermissionChanger,
    group_changer: GroupPermissionChanger,
    metrics: Arc<Metrics>,
}

impl<P: PermissionStore, I: SearchIndex> PermissionUpdater<P, I> {
    pub fn new(indexer: Arc<AuthorizationIndexer<P, I>>) -> Self {
        let metrics = Arc::clone(indexer.metrics());
        Self {
            indexer,
            user_changer: UserPermissionChanger::new(),
            group_changer: GroupPermissionChanger::new(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Applies one change. Returns whether a permission row was inserted or
    /// deleted.
    #[tracing::instrument(
        skip_all,
        fields(
            operation = %change.operation(),
            organization_id = %change.organization_id(),
            permission = change.permission(),
        )
    )]
    pub async fn apply(
        &self,
        session: &mut P::Session,
        change: &PermissionChange,
    ) -> Result<bool, SyncError> {
        let changed = match self.dispatch(session, change).await {
            Ok(changed) => changed,
            Err(e) => {
                rollback_quietly(session).await;
                return Err(e);
            }
        };
        let changed = match session.commit().await {
            Ok(()) => changed,
            // Another session committed the same row first.
            Err(StorageError::Duplicate {
                kind: "permission", ..
            }) => {
                rollback_quietly(session).await;
                false
            }
            Err(e) => {
                rollback_quietly(session).await;
                return Err(e.into());
            }
        };

        if changed {
            self.metrics.record_change_applied();
        } else {
            self.metrics.record_change_noop();
        }
        audit::audit_permission_change(change, changed);

        // Global permissions are not part of any indexed document.
        let Some(resource_id) = change.resource_id().filter(|_| changed) else {
            return Ok(changed);
        };

        touch(session, resource_id).await.map_err(|source| {
            SyncError::AuthorizationDateNotUpdated {
                resource_id: resource_id.clone(),
                source,
            }
        })?;
        self.indexer.reindex_resource(session, resource_id).await?;
        Ok(changed)
    }

    async fn dispatch(
        &self,
        session: &mut P::Session,
        change: &PermissionChange,
    ) -> Result<bool, SyncError> {
        match change {
            PermissionChange::User(c) => self.user_changer.apply(session, c).await,
            PermissionChange::Group(c) => self.group_changer.apply(session, c).await,
            other => Err(SyncError::UnsupportedChangeKind(format!("{other:?}"))),
        }
    }
}

async fn touch<S: PermissionSession>(
    session: &mut S,
    resource_id: &ResourceId,
) -> Result<(), StorageError> {
    let result = match session
        .touch_authorization_date(resource_id, now_epoch_millis())
        .await
    {
        Ok(()) => session.commit().await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        rollback_quietly(session).await;
    }
    result
}

async fn rollback_quietly<S: PermissionSession>(session: &mut S) {
    if let Err(e) = session.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

fn now_epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
