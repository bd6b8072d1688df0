use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_stream::try_stream;
use dashmap::DashMap;
use futures::{Stream, future::BoxFuture, stream::BoxStream};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::dao::storage::{StorageError, StorageResult};

use super::{
    CollectionQuery, Document, DocumentPath, DocumentStore, DocumentUpdate, StoredDocument,
    WriteMode,
    ops::{apply_update, run_query, write_fields},
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Raised while the in-memory store is switched offline.
#[derive(Debug, Error)]
#[error("in-memory store is offline")]
pub struct StoreOffline;

#[derive(Debug, Clone)]
struct ChangeNotice {
    collection: String,
    id: String,
}

struct MemoryInner {
    collections: DashMap<String, IndexMap<String, Document>>,
    changes: broadcast::Sender<ChangeNotice>,
    online: AtomicBool,
}

/// Process-local document store with push notifications.
///
/// Collections keep insertion order. [`MemoryDocumentStore::set_online`] simulates an outage.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                collections: DashMap::new(),
                changes,
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Switch the store on or off. While off every operation fails as unavailable and open
    /// subscriptions end at their next notification.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        debug!(online, "in-memory store availability changed");
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                "in-memory store switched offline".into(),
                StoreOffline,
            ))
        }
    }

    fn notify(&self, path: &DocumentPath) {
        // No receivers simply means nobody is observing.
        let _ = self.inner.changes.send(ChangeNotice {
            collection: path.collection.clone(),
            id: path.id.clone(),
        });
    }

    fn read_now(&self, path: &DocumentPath) -> Option<Document> {
        self.inner
            .collections
            .get(&path.collection)
            .and_then(|collection| collection.get(&path.id).cloned())
    }

    fn query_now(&self, query: &CollectionQuery) -> Vec<StoredDocument> {
        let documents = self
            .inner
            .collections
            .get(&query.collection)
            .map(|collection| {
                collection
                    .iter()
                    .map(|(id, fields)| StoredDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        run_query(query, documents)
    }

    fn write_now(&self, path: &DocumentPath, fields: Document, mode: WriteMode) {
        let mut collection = self
            .inner
            .collections
            .entry(path.collection.clone())
            .or_default();
        let existing = collection.get(&path.id).cloned();
        collection.insert(path.id.clone(), write_fields(existing, fields, mode));
    }

    fn update_now(&self, path: &DocumentPath, update: &DocumentUpdate) -> StorageResult<Document> {
        let missing = || StorageError::MissingDocument {
            path: path.to_string(),
        };
        let mut collection = self
            .inner
            .collections
            .get_mut(&path.collection)
            .ok_or_else(missing)?;
        let document = collection.get_mut(&path.id).ok_or_else(missing)?;

        let next = apply_update(path, document, update)?;
        *document = next.clone();
        Ok(next)
    }

    fn delete_now(&self, path: &DocumentPath) -> bool {
        self.inner
            .collections
            .get_mut(&path.collection)
            .is_some_and(|mut collection| collection.shift_remove(&path.id).is_some())
    }

    fn document_changes(
        &self,
        path: DocumentPath,
    ) -> impl Stream<Item = StorageResult<Option<Document>>> + Send + 'static {
        let store = self.clone();
        try_stream! {
            let mut changes = store.inner.changes.subscribe();
            store.ensure_online()?;
            yield store.read_now(&path);

            loop {
                let relevant = match changes.recv().await {
                    Ok(notice) => notice.collection == path.collection && notice.id == path.id,
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => break,
                };
                if relevant {
                    store.ensure_online()?;
                    yield store.read_now(&path);
                }
            }
        }
    }

    fn query_changes(
        &self,
        query: CollectionQuery,
    ) -> impl Stream<Item = StorageResult<Vec<StoredDocument>>> + Send + 'static {
        let store = self.clone();
        try_stream! {
            let mut changes = store.inner.changes.subscribe();
            store.ensure_online()?;
            yield store.query_now(&query);

            loop {
                let relevant = match changes.recv().await {
                    Ok(notice) => notice.collection == query.collection,
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => break,
                };
                if relevant {
                    store.ensure_online()?;
                    yield store.query_now(&query);
                }
            }
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, path: &DocumentPath) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.read_now(&path))
        })
    }

    fn query(
        &self,
        query: &CollectionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>> {
        let store = self.clone();
        let query = query.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.query_now(&query))
        })
    }

    fn write(
        &self,
        path: &DocumentPath,
        fields: Document,
        mode: WriteMode,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move {
            store.ensure_online()?;
            store.write_now(&path, fields, mode);
            store.notify(&path);
            Ok(())
        })
    }

    fn update(
        &self,
        path: &DocumentPath,
        update: DocumentUpdate,
    ) -> BoxFuture<'static, StorageResult<Document>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let next = store.update_now(&path, &update)?;
            store.notify(&path);
            Ok(next)
        })
    }

    fn delete(&self, path: &DocumentPath) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let path = path.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let removed = store.delete_now(&path);
            if removed {
                store.notify(&path);
            }
            Ok(removed)
        })
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
    ) -> BoxStream<'static, StorageResult<Option<Document>>> {
        Box::pin(self.document_changes(path.clone()))
    }

    fn subscribe_query(
        &self,
        query: &CollectionQuery,
    ) -> BoxStream<'static, StorageResult<Vec<StoredDocument>>> {
        Box::pin(self.query_changes(query.clone()))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::{Value, json};

    use super::*;
    use crate::dao::document_store::SortDirection;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[tokio::test]
    async fn write_read_and_merge() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("system", "config");

        assert_eq!(store.read(&path).await.unwrap(), None);

        store
            .write(&path, doc(json!({"status": "idle", "isRunning": false})), WriteMode::Replace)
            .await
            .unwrap();
        store
            .write(&path, doc(json!({"status": "active"})), WriteMode::Merge)
            .await
            .unwrap();

        assert_eq!(
            store.read(&path).await.unwrap(),
            Some(doc(json!({"status": "active", "isRunning": false})))
        );
    }

    #[tokio::test]
    async fn update_requires_an_existing_document() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("teams", "ghost");

        let err = store
            .update(&path, DocumentUpdate::new().increment("score", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingDocument { .. }));
    }

    #[tokio::test]
    async fn failed_precondition_leaves_document_untouched() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("teams", "t1");
        let original = doc(json!({"score": 5, "pendingChallengeIds": []}));
        store
            .write(&path, original.clone(), WriteMode::Replace)
            .await
            .unwrap();

        let update = DocumentUpdate::new()
            .require_contains("pendingChallengeIds", 1)
            .increment("score", 20);
        assert!(store.update(&path, update).await.is_err());
        assert_eq!(store.read(&path).await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn query_and_delete() {
        let store = MemoryDocumentStore::new();
        for (id, score) in [("a", 1), ("b", 3), ("c", 2)] {
            store
                .write(
                    &DocumentPath::new("teams", id),
                    doc(json!({"score": score})),
                    WriteMode::Replace,
                )
                .await
                .unwrap();
        }

        let top = store
            .query(
                &CollectionQuery::all("teams")
                    .order_by("score", SortDirection::Descending)
                    .limit(2),
            )
            .await
            .unwrap();
        let ids: Vec<_> = top.iter().map(|document| document.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);

        assert!(store.delete(&DocumentPath::new("teams", "b")).await.unwrap());
        assert!(!store.delete(&DocumentPath::new("teams", "b")).await.unwrap());
        assert_eq!(
            store.query(&CollectionQuery::all("teams")).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn document_subscription_yields_snapshot_then_changes() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("system", "config");
        let mut updates = store.subscribe_document(&path);

        assert_eq!(updates.next().await.unwrap().unwrap(), None);

        store
            .write(&path, doc(json!({"status": "active"})), WriteMode::Merge)
            .await
            .unwrap();
        store
            .write(&DocumentPath::new("system", "other"), Document::new(), WriteMode::Merge)
            .await
            .unwrap();
        store
            .write(&path, doc(json!({"status": "revealed"})), WriteMode::Merge)
            .await
            .unwrap();

        assert_eq!(
            updates.next().await.unwrap().unwrap(),
            Some(doc(json!({"status": "active"})))
        );
        assert_eq!(
            updates.next().await.unwrap().unwrap(),
            Some(doc(json!({"status": "revealed"})))
        );
    }

    #[tokio::test]
    async fn query_subscription_tracks_the_collection() {
        let store = MemoryDocumentStore::new();
        let mut updates = store.subscribe_query(&CollectionQuery::all("teams"));
        assert!(updates.next().await.unwrap().unwrap().is_empty());

        store
            .write(&DocumentPath::new("teams", "t1"), Document::new(), WriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(updates.next().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_fails_operations_and_ends_subscriptions() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("system", "config");
        let mut updates = store.subscribe_document(&path);
        assert!(updates.next().await.unwrap().is_ok());

        store.set_online(false);
        assert!(matches!(
            store.read(&path).await,
            Err(StorageError::Unavailable { .. })
        ));
        assert!(store.health_check().await.is_err());

        // Notifications still flow internally; the subscriber sees the outage on the next one.
        store.write_now(&path, Document::new(), WriteMode::Merge);
        store.notify(&path);
        assert!(updates.next().await.unwrap().is_err());
        assert!(updates.next().await.is_none());

        store.set_online(true);
        assert!(store.try_reconnect().await.is_ok());
    }
}
