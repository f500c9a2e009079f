use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use gatehouse_core::{IndexedAuthorizationDocument, ResourceId};

use crate::error::IndexError;
use crate::traits::SearchIndex;

/// Index kept in process memory. Can be switched off to behave like an
/// unreachable search engine.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    documents: Mutex<BTreeMap<ResourceId, IndexedAuthorizationDocument>>,
    unavailable: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn documents(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<ResourceId, IndexedAuthorizationDocument>>, IndexError>
    {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable(
                "in-memory index is switched off".to_string(),
            ));
        }
        self.documents
            .lock()
            .map_err(|_| IndexError::Unavailable("in-memory index lock poisoned".to_string()))
    }
}

impl SearchIndex for InMemorySearchIndex {
    async fn index(&self, document: &IndexedAuthorizationDocument) -> Result<(), IndexError> {
        self.documents()?
            .insert(document.resource_id.clone(), document.clone());
        Ok(())
    }

    async fn index_bulk(&self, documents: &[IndexedAuthorizationDocument]) -> Result<(), IndexError> {
        let mut stored = self.documents()?;
        for document in documents {
            stored.insert(document.resource_id.clone(), document.clone());
        }
        Ok(())
    }

    async fn delete(&self, resource_id: &ResourceId) -> Result<bool, IndexError> {
        Ok(self.documents()?.remove(resource_id).is_some())
    }

    async fn delete_bulk(&self, resource_ids: &[ResourceId]) -> Result<usize, IndexError> {
        let mut stored = self.documents()?;
        Ok(resource_ids
            .iter()
            .filter(|id| stored.remove(*id).is_some())
            .count())
    }

    async fn delete_descendants(&self, resource_id: &ResourceId) -> Result<usize, IndexError> {
        let mut stored = self.documents()?;
        let before = stored.len();
        stored.retain(|_, doc| !doc.is_descendant_of(resource_id));
        Ok(before - stored.len())
    }

    async fn clear(&self) -> Result<(), IndexError> {
        self.documents()?.clear();
        Ok(())
    }

    async fn get(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<IndexedAuthorizationDocument>, IndexError> {
        Ok(self.documents()?.get(resource_id).cloned())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.documents()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::AuthorizationSnapshot;

    fn doc(id: &str, ancestors: &[&str], updated_at: i64) -> IndexedAuthorizationDocument {
        AuthorizationSnapshot::new(id, updated_at)
            .with_ancestors(ancestors.iter().map(|a| ResourceId::new(*a)).collect())
            .with_group("devs")
            .into()
    }

    #[tokio::test]
    async fn index_replaces_whole_document() {
        let index = InMemorySearchIndex::new();
        index.index(&doc("p1", &[], 1)).await.unwrap();

        let empty: IndexedAuthorizationDocument = AuthorizationSnapshot::new("p1", 2).into();
        index.index(&empty).await.unwrap();

        let stored = index.get(&ResourceId::new("p1")).await.unwrap().unwrap();
        assert!(stored.groups.is_empty());
        assert_eq!(stored.updated_at, 2);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_descendants_follows_ancestry() {
        let index = InMemorySearchIndex::new();
        index
            .index_bulk(&[
                doc("p1", &[], 1),
                doc("m1", &["p1"], 1),
                doc("f1", &["p1", "m1"], 1),
                doc("p2", &[], 1),
            ])
            .await
            .unwrap();

        let removed = index.delete_descendants(&ResourceId::new("p1")).await.unwrap();

        assert_eq!(removed, 2);
        assert!(index.get(&ResourceId::new("p1")).await.unwrap().is_some());
        assert!(index.get(&ResourceId::new("p2")).await.unwrap().is_some());
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deleting_missing_document_is_not_an_error() {
        let index = InMemorySearchIndex::new();

        assert!(!index.delete(&ResourceId::new("ghost")).await.unwrap());
        assert_eq!(
            index
                .delete_bulk(&[ResourceId::new("ghost")])
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn count_follows_writes_and_clear() {
        let index = InMemorySearchIndex::new();
        assert_eq!(index.count().await.unwrap(), 0);

        index
            .index_bulk(&[doc("p1", &[], 10), doc("p2", &[], 30), doc("p3", &[], 20)])
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 3);

        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn switched_off_index_reports_unavailable() {
        let index = InMemorySearchIndex::new();
        index.set_unavailable(true);

        let err = index.index(&doc("p1", &[], 1)).await.unwrap_err();
        assert!(err.is_unavailable());

        index.set_unavailable(false);
        index.index(&doc("p1", &[], 1)).await.unwrap();
    }
}
