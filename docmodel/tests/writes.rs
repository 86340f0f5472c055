use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use docmodel::{
    backend::{BlobStore, Namespace, StoreBackend},
    cache,
    memory::{InMemoryBlobStore, InMemoryStore},
    pool,
    prelude::*,
    query::Query,
};

/// Blob store that tracks which blobs exist.
#[derive(Debug, Default)]
struct TrackedBlobs {
    inner: InMemoryBlobStore,
    live: Mutex<HashSet<ObjectId>>,
}

#[async_trait]
impl BlobStore for TrackedBlobs {
    async fn put(&self, data: Vec<u8>) -> DocumentStoreResult<ObjectId> {
        let id = self.inner.put(data).await?;
        self.live.lock().unwrap().insert(id);
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> DocumentStoreResult<Option<Vec<u8>>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &ObjectId) -> DocumentStoreResult<()> {
        self.live.lock().unwrap().remove(id);
        self.inner.delete(id).await
    }
}

/// In-memory store whose document writes can be switched to fail. Every
/// write of a `Watched` instance records whether the identity cache still
/// held it.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: InMemoryStore,
    blobs: Arc<TrackedBlobs>,
    failing: AtomicBool,
    cached_during_save: Mutex<Vec<bool>>,
}

impl FlakyStore {
    fn attach(endpoint: &Endpoint) -> Arc<FlakyStore> {
        let store = Arc::new(FlakyStore::default());
        pool::attach(endpoint, store.clone());
        store
    }

    fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn live_blobs(&self) -> HashSet<ObjectId> {
        self.blobs.live.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreBackend for FlakyStore {
    async fn find(&self, ns: &Namespace, query: Query) -> DocumentStoreResult<Vec<Document>> {
        self.inner.find(ns, query).await
    }

    async fn find_one(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>> {
        self.inner.find_one(ns, filter).await
    }

    async fn count(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        self.inner.count(ns, filter).await
    }

    async fn save(&self, ns: &Namespace, document: Document) -> DocumentStoreResult<ObjectId> {
        if ns.collection == Watched::collection_name() {
            if let Ok(id) = document.get_object_id("_id") {
                let cached = cache::get::<Watched>(&id).is_some();
                self.cached_during_save.lock().unwrap().push(cached);
            }
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Backend("transport down".into()));
        }
        self.inner.save(ns, document).await
    }

    async fn remove(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        self.inner.remove(ns, filter).await
    }

    async fn find_and_modify(&self, ns: &Namespace, request: FindAndModify) -> DocumentStoreResult<Option<Document>> {
        self.inner.find_and_modify(ns, request).await
    }

    async fn create_index(&self, ns: &Namespace, index: IndexSpec) -> DocumentStoreResult<()> {
        self.inner.create_index(ns, index).await
    }

    async fn drop_collection(&self, ns: &Namespace) -> DocumentStoreResult<()> {
        self.inner.drop_collection(ns).await
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        self.inner.list_collections(database).await
    }

    async fn blobs(&self, _database: &str) -> DocumentStoreResult<Arc<dyn BlobStore>> {
        Ok(self.blobs.clone())
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "writes_uploads")]
struct Upload {
    id: Option<ObjectId>,
    name: Option<String>,
    data: FileBlob,
}

#[async_trait]
impl Model for Upload {
    fn endpoint() -> Option<Endpoint> {
        Some(Endpoint::new("writes-uploads.test", 27017, "writes"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "writes_watched")]
struct Watched {
    id: Option<ObjectId>,
    label: Option<String>,
}

#[async_trait]
impl Model for Watched {
    fn endpoint() -> Option<Endpoint> {
        Some(Endpoint::new("writes-watched.test", 27017, "writes"))
    }
}

#[tokio::test]
async fn failed_writes_keep_the_previous_blob() {
    let store = FlakyStore::attach(&Upload::model_endpoint());

    let mut upload = Upload::with(doc! { "name": "report.txt" }).unwrap();
    upload.data.write("first draft");
    upload.save().await.unwrap();
    let first = upload.data.id().unwrap();

    store.fail_saves(true);
    upload.data.write("second draft");
    assert!(matches!(upload.save().await, Err(DocumentStoreError::Backend(_))));

    // the instance is as it was, and the staged blob is gone again
    assert_eq!(upload.data.id(), Some(first));
    assert!(upload.data.is_dirty());
    assert_eq!(store.live_blobs(), HashSet::from([first]));

    let stored = Upload::find_one(doc! { "name": "report.txt" }).await.unwrap().unwrap();
    assert_eq!(stored.data.id(), Some(first));
    assert_eq!(stored.read_blob("data").await.unwrap(), Some(b"first draft".to_vec()));

    store.fail_saves(false);
    upload.save().await.unwrap();
    let second = upload.data.id().unwrap();
    assert_ne!(second, first);
    assert_eq!(store.live_blobs(), HashSet::from([second]));
    assert_eq!(upload.read_blob("data").await.unwrap(), Some(b"second draft".to_vec()));
}

#[tokio::test]
async fn updates_evict_the_cache_before_writing() {
    let store = FlakyStore::attach(&Watched::model_endpoint());

    let mut watched = Watched::create(doc! { "label": "before" }).await.unwrap();
    let id = watched.id().unwrap();
    assert!(cache::get::<Watched>(&id).is_some());

    watched.label = Some("after".into());
    watched.save().await.unwrap();

    assert_eq!(*store.cached_during_save.lock().unwrap(), vec![false]);
    let reloaded = Watched::get(id).await.unwrap().unwrap();
    assert_eq!(reloaded.label.as_deref(), Some("after"));
}
