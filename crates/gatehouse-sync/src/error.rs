use gatehouse_core::ResourceId;
use gatehouse_index::IndexError;
use gatehouse_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unsupported permission change: {0}")]
    UnsupportedChangeKind(String),

    #[error("invalid permission change: {0}")]
    InvalidChange(String),

    /// The permission change is committed but the index could not be
    /// reached. Run a catch-up or full re-index once it is back.
    #[error("search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("search index error: {0}")]
    Index(#[source] IndexError),

    #[error("authorization date of resource {resource_id} not updated: {source}")]
    AuthorizationDateNotUpdated {
        resource_id: ResourceId,
        #[source]
        source: StorageError,
    },
}

impl SyncError {
    /// True when the store holds the change but the index may be stale.
    pub fn requires_reindex(&self) -> bool {
        matches!(
            self,
            SyncError::IndexUnavailable(_)
                | SyncError::Index(_)
                | SyncError::AuthorizationDateNotUpdated { .. }
        )
    }
}

impl From<IndexError> for SyncError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Unavailable(message) => SyncError::IndexUnavailable(message),
            other => SyncError::Index(other),
        }
    }
}
