use std::sync::Arc;

use gatehouse_core::{AuthorizationSnapshot, IndexedAuthorizationDocument, ResourceId, keys};
use gatehouse_index::{IndexError, SearchIndex};
use gatehouse_storage::{PermissionSession, PermissionStore, SnapshotScope, StorageError};

use crate::audit;
use crate::error::SyncError;
use crate::metrics::Metrics;

pub const DEFAULT_BULK_SIZE: usize = 500;

/// Keeps the search index in line with the permission store.
///
/// Documents are derived from store snapshots and always written whole, so
/// the last write for a resource wins and a re-index can be repeated safely.
/// After each successful write the store records the timestamp the document
/// was built from; resources touched since then are what `catch_up` replays.
pub struct AuthorizationIndexer<P, I> {
    store: Arc<P>,
    index: Arc<I>,
    browse_permission: String,
    bulk_size: usize,
    metrics: Arc<Metrics>,
}

impl<P: PermissionStore, I: SearchIndex> AuthorizationIndexer<P, I> {
    pub fn new(store: Arc<P>, index: Arc<I>) -> Self {
        Self {
            store,
            index,
            browse_permission: keys::USER.to_string(),
            bulk_size: DEFAULT_BULK_SIZE,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Permission whose grants make up the indexed documents.
    pub fn with_browse_permission(mut self, permission: impl Into<String>) -> Self {
        self.browse_permission = permission.into();
        self
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn search_index(&self) -> &Arc<I> {
        &self.index
    }

    /// Rebuilds the index from scratch: one document per resource that has
    /// at least one permission row.
    #[tracing::instrument(skip(self))]
    pub async fn reindex_all(&self) -> Result<usize, SyncError> {
        let snapshots = self.read_snapshots(&SnapshotScope::WithAnyPermission).await?;
        self.index
            .clear()
            .await
            .map_err(|e| self.index_failure(e))?;
        let count = self.push_and_mark(snapshots).await?;

        audit::audit_reindex("full", count);
        Ok(count)
    }

    /// Writes the given snapshots, replacing whatever the index held for
    /// those resources.
    pub async fn reindex(&self, snapshots: Vec<AuthorizationSnapshot>) -> Result<usize, SyncError> {
        self.push_and_mark(snapshots).await
    }

    /// Re-reads one resource through the caller's session and indexes it.
    /// Resources unknown to the store are skipped.
    #[tracing::instrument(skip(self, session))]
    pub async fn reindex_resource(
        &self,
        session: &mut P::Session,
        resource_id: &ResourceId,
    ) -> Result<(), SyncError> {
        let scope = SnapshotScope::Resources(vec![resource_id.clone()]);
        let snapshots = session
            .authorization_snapshots(&scope, &self.browse_permission)
            .await?;
        if snapshots.is_empty() {
            tracing::debug!(%resource_id, "resource not in store, nothing to index");
            return Ok(());
        }
        let marks = index_marks(&snapshots);
        self.push(snapshots).await?;
        record_indexed(session, &marks).await;
        Ok(())
    }

    /// Re-indexes every resource whose authorization changed after its last
    /// successful index write, including writes lost to an index outage.
    /// Falls back to a full rebuild on an empty index.
    #[tracing::instrument(skip(self))]
    pub async fn catch_up(&self) -> Result<usize, SyncError> {
        let indexed = self
            .index
            .count()
            .await
            .map_err(|e| self.index_failure(e))?;
        if indexed == 0 {
            return self.reindex_all().await;
        }

        let snapshots = self.read_snapshots(&SnapshotScope::PendingIndex).await?;
        let count = self.push_and_mark(snapshots).await?;

        audit::audit_reindex("catch_up", count);
        Ok(count)
    }

    /// Removes the resource's document and, if asked, those of every
    /// resource below it. Resources never indexed are not an error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_resource(
        &self,
        resource_id: &ResourceId,
        with_descendants: bool,
    ) -> Result<usize, SyncError> {
        let mut removed = usize::from(
            self.index
                .delete(resource_id)
                .await
                .map_err(|e| self.index_failure(e))?,
        );
        if with_descendants {
            removed += self
                .index
                .delete_descendants(resource_id)
                .await
                .map_err(|e| self.index_failure(e))?;
        }

        self.metrics.record_documents_deleted(removed);
        audit::audit_resource_deletion(resource_id, with_descendants, removed);
        Ok(removed)
    }

    async fn read_snapshots(
        &self,
        scope: &SnapshotScope,
    ) -> Result<Vec<AuthorizationSnapshot>, SyncError> {
        let mut session = self.store.open_session().await?;
        let snapshots = session
            .authorization_snapshots(scope, &self.browse_permission)
            .await?;
        session.rollback().await?;
        Ok(snapshots)
    }

    async fn push_and_mark(
        &self,
        snapshots: Vec<AuthorizationSnapshot>,
    ) -> Result<usize, SyncError> {
        let marks = index_marks(&snapshots);
        let count = self.push(snapshots).await?;
        if !marks.is_empty() {
            match self.store.open_session().await {
                Ok(mut session) => record_indexed(&mut session, &marks).await,
                Err(e) => tracing::warn!(error = %e, "indexed state not recorded"),
            }
        }
        Ok(count)
    }

    async fn push(&self, snapshots: Vec<AuthorizationSnapshot>) -> Result<usize, SyncError> {
        let documents: Vec<IndexedAuthorizationDocument> =
            snapshots.into_iter().map(Into::into).collect();

        for chunk in documents.chunks(self.bulk_size) {
            let written = match chunk {
                [document] => self.index.index(document).await,
                _ => self.index.index_bulk(chunk).await,
            };
            written.map_err(|e| self.index_failure(e))?;
            self.metrics.record_documents_indexed(chunk.len());
        }

        tracing::debug!(documents = documents.len(), "authorization documents indexed");
        Ok(documents.len())
    }

    fn index_failure(&self, e: IndexError) -> SyncError {
        self.metrics.record_index_failure();
        tracing::warn!(error = %e, "search index call failed");
        e.into()
    }
}

/// Resources and the timestamps their documents were built from. Resources
/// never touched have nothing to record.
fn index_marks(snapshots: &[AuthorizationSnapshot]) -> Vec<(ResourceId, i64)> {
    snapshots
        .iter()
        .filter(|snapshot| snapshot.updated_at > 0)
        .map(|snapshot| (snapshot.resource_id.clone(), snapshot.updated_at))
        .collect()
}

/// The documents are already written at this point. A failure only leaves
/// the resources pending, so the next catch-up writes them again.
async fn record_indexed<S: PermissionSession>(session: &mut S, marks: &[(ResourceId, i64)]) {
    if let Err(e) = mark_all(session, marks).await {
        tracing::warn!(error = %e, resources = marks.len(), "indexed state not recorded");
        if let Err(e) = session.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}

async fn mark_all<S: PermissionSession>(
    session: &mut S,
    marks: &[(ResourceId, i64)],
) -> Result<(), StorageError> {
    for (resource_id, at) in marks {
        session.mark_indexed(resource_id, *at).await?;
    }
    session.commit().await
}
