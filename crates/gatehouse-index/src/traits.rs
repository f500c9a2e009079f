use std::future::Future;

use gatehouse_core::{IndexedAuthorizationDocument, ResourceId};

use crate::error::IndexError;

/// Document store holding one authorization document per resource.
///
/// Every write replaces the whole document and is visible to the next read.
pub trait SearchIndex: Send + Sync {
    fn index(
        &self,
        document: &IndexedAuthorizationDocument,
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    fn index_bulk(
        &self,
        documents: &[IndexedAuthorizationDocument],
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Returns whether a document was removed. Missing documents are not an error.
    fn delete(
        &self,
        resource_id: &ResourceId,
    ) -> impl Future<Output = Result<bool, IndexError>> + Send;

    fn delete_bulk(
        &self,
        resource_ids: &[ResourceId],
    ) -> impl Future<Output = Result<usize, IndexError>> + Send;

    /// Removes every document listing `resource_id` among its ancestors.
    fn delete_descendants(
        &self,
        resource_id: &ResourceId,
    ) -> impl Future<Output = Result<usize, IndexError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), IndexError>> + Send;

    fn get(
        &self,
        resource_id: &ResourceId,
    ) -> impl Future<Output = Result<Option<IndexedAuthorizationDocument>, IndexError>> + Send;

    fn count(&self) -> impl Future<Output = Result<usize, IndexError>> + Send;
}
