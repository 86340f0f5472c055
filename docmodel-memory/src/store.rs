//! In-memory storage implementation of the driver contract.
//!
//! Collections are insertion-ordered vectors of BSON documents behind one
//! async-aware read-write lock. Every operation takes the lock once, so
//! `find_and_modify` is atomic with respect to all other operations.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;

use docmodel_core::{
    backend::{BlobStore, Connector, Namespace, StoreBackend},
    config::Endpoint,
    error::{DocumentStoreError, DocumentStoreResult},
    id::ID_KEY,
    query::{Expr, FindAndModify, IndexSpec, Query},
};

use crate::{
    evaluator::{DocumentEvaluator, compare_documents},
    update,
};

type StoreMap = HashMap<Namespace, Vec<Document>>;

/// Thread-safe in-memory document store.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so
/// clones share the same data.
///
/// # Performance
///
/// Queries scan every document of a collection; indexes are accepted and
/// ignored.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::{Namespace, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let ns = Namespace::new("modeltest", "users");
/// let id = store.save(&ns, doc! { "name": "Alice" }).await?;
/// assert!(store.find_one(&ns, doc! { "_id": id }).await?.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
    blobs: Arc<RwLock<HashMap<String, Arc<InMemoryBlobStore>>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn matching<'a>(
    documents: &'a [Document],
    filter: &Document,
) -> DocumentStoreResult<impl Iterator<Item = (usize, &'a Document)>> {
    let expr = Expr::from_filter(filter)?;
    let mut matched = Vec::new();
    for (index, document) in documents.iter().enumerate() {
        if DocumentEvaluator::matches(document, &expr)? {
            matched.push((index, document));
        }
    }
    Ok(matched.into_iter())
}

/// Puts `_id` first, generating one when absent.
fn with_identifier(document: Document) -> (ObjectId, Document) {
    let id = match document.get(ID_KEY) {
        Some(Bson::ObjectId(id)) => *id,
        _ => ObjectId::new(),
    };

    let mut stored = Document::new();
    stored.insert(ID_KEY, id);
    for (key, value) in document {
        if key != ID_KEY {
            stored.insert(key, value);
        }
    }
    (id, stored)
}

fn position_of(documents: &[Document], id: &ObjectId) -> Option<usize> {
    documents
        .iter()
        .position(|document| matches!(document.get(ID_KEY), Some(Bson::ObjectId(stored)) if stored == id))
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(&self, ns: &Namespace, query: Query) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(ns) else {
            return Ok(vec![]);
        };

        let mut found = matching(documents, &query.filter)?
            .map(|(_, document)| document.clone())
            .collect::<Vec<_>>();

        if !query.sort.is_empty() {
            found.sort_by(|a, b| compare_documents(a, b, &query.sort));
        }

        Ok(found
            .into_iter()
            .skip(query.skip.unwrap_or(0) as usize)
            .take(query.limit.map_or(usize::MAX, |limit| limit as usize))
            .collect())
    }

    async fn find_one(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(ns) else {
            return Ok(None);
        };

        Ok(matching(documents, &filter)?.next().map(|(_, document)| document.clone()))
    }

    async fn count(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(ns) else {
            return Ok(0);
        };

        Ok(matching(documents, &filter)?.count() as u64)
    }

    async fn save(&self, ns: &Namespace, document: Document) -> DocumentStoreResult<ObjectId> {
        let (id, document) = with_identifier(document);

        let mut store = self.store.write().await;
        let documents = store.entry(ns.clone()).or_default();
        match position_of(documents, &id) {
            Some(index) => documents[index] = document,
            None => documents.push(document),
        }

        Ok(id)
    }

    async fn remove(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        let expr = Expr::from_filter(&filter)?;

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(ns) else {
            return Ok(0);
        };

        let before = documents.len();
        let mut failure = None;
        documents.retain(|document| match DocumentEvaluator::matches(document, &expr) {
            Ok(matched) => !matched,
            Err(err) => {
                failure.get_or_insert(err);
                true
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        Ok((before - documents.len()) as u64)
    }

    async fn find_and_modify(
        &self,
        ns: &Namespace,
        request: FindAndModify,
    ) -> DocumentStoreResult<Option<Document>> {
        if request.update.is_none() && !request.remove {
            return Err(DocumentStoreError::InvalidQuery(
                "find_and_modify needs an update or remove".to_string(),
            ));
        }

        let mut store = self.store.write().await;
        let documents = store.entry(ns.clone()).or_default();

        let target = {
            let mut candidates = matching(documents, &request.query)?.collect::<Vec<_>>();
            if !request.sort.is_empty() {
                candidates.sort_by(|(_, a), (_, b)| compare_documents(a, b, &request.sort));
            }
            candidates.first().map(|(index, _)| *index)
        };

        if request.remove {
            return Ok(target.map(|index| documents.remove(index)));
        }

        let update = request.update.unwrap_or_default();
        match target {
            Some(index) => {
                let mut updated = documents[index].clone();
                update::apply(&mut updated, &update, false)?;
                let original = std::mem::replace(&mut documents[index], updated);
                Ok(Some(if request.new { documents[index].clone() } else { original }))
            }
            None if request.upsert => {
                let mut document = update::seed(&request.query);
                update::apply(&mut document, &update, true)?;
                let (_, document) = with_identifier(document);
                documents.push(document.clone());
                Ok(request.new.then_some(document))
            }
            None => Ok(None),
        }
    }

    async fn create_index(&self, ns: &Namespace, index: IndexSpec) -> DocumentStoreResult<()> {
        tracing::debug!(%ns, ?index, "in-memory store ignores indexes");
        Ok(())
    }

    async fn drop_collection(&self, ns: &Namespace) -> DocumentStoreResult<()> {
        self.store.write().await.remove(ns);
        Ok(())
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .filter(|ns| ns.database == database)
            .map(|ns| ns.collection.clone())
            .collect::<Vec<_>>();
        names.sort_unstable();
        Ok(names)
    }

    async fn blobs(&self, database: &str) -> DocumentStoreResult<Arc<dyn BlobStore>> {
        let mut blobs = self.blobs.write().await;
        let store = blobs.entry(database.to_string()).or_default().clone();
        Ok(store)
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// In-memory blob store, one per database.
#[derive(Default, Debug)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, data: Vec<u8>) -> DocumentStoreResult<ObjectId> {
        let id = ObjectId::new();
        self.blobs.write().await.insert(id, data);
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> DocumentStoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &ObjectId) -> DocumentStoreResult<()> {
        self.blobs.write().await.remove(id);
        Ok(())
    }
}

/// Connector handing out a fresh [`InMemoryStore`] per server.
#[derive(Default, Debug, Clone, Copy)]
pub struct InMemoryConnector;

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> DocumentStoreResult<Arc<dyn StoreBackend>> {
        tracing::debug!(%endpoint, "opening in-memory store");
        Ok(Arc::new(InMemoryStore::new()))
    }
}
