use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::{
    TryStreamExt,
    io::{AsyncReadExt, AsyncWriteExt},
};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{ErrorKind, GridFsErrorKind},
    gridfs::GridFsBucket,
    options::{
        FindOneAndDeleteOptions, FindOneAndReplaceOptions, FindOneAndUpdateOptions, FindOptions,
        IndexOptions, ReturnDocument,
    },
};
use docmodel_core::{
    backend::{BlobStore, Connector, Namespace, StoreBackend},
    config::Endpoint,
    error::{DocumentStoreError, DocumentStoreResult},
    id::ID_KEY,
    query::{FindAndModify, IndexSpec, Query, Sort, is_operator_document},
};

use crate::sanitizer::KeySanitizer;


fn backend_error(error: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(error.to_string())
}

fn is_missing_file(error: &mongodb::error::Error) -> bool {
    matches!(*error.kind, ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. }))
}

fn sort_option(sort: &[Sort]) -> Option<Document> {
    (!sort.is_empty()).then(|| Sort::to_document(sort))
}

/// MongoDB driver. One client serves every database on the server.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Opens a client for a connection string.
    pub async fn connect(uri: &str) -> DocumentStoreResult<Self> {
        Ok(Self::new(
            Client::with_uri_str(uri)
                .await
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
        ))
    }

    fn get_collection(&self, ns: &Namespace) -> MongoCollection<Document> {
        self.client
            .database(&ns.database)
            .collection(&ns.collection)
    }
}

#[async_trait]
impl StoreBackend for MongoStore {
    async fn find(&self, ns: &Namespace, query: Query) -> DocumentStoreResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.sort = sort_option(&query.sort);
        options.skip = query.skip;
        options.limit = query.limit.map(|limit| limit as i64);

        Ok(
            self.get_collection(ns)
                .find(query.filter)
                .with_options(options)
                .await
                .map_err(backend_error)?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(backend_error)?
                .into_iter()
                .map(KeySanitizer::restore_document)
                .collect()
        )
    }

    async fn find_one(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>> {
        Ok(
            self.get_collection(ns)
                .find_one(filter)
                .await
                .map_err(backend_error)?
                .map(KeySanitizer::restore_document)
        )
    }

    async fn count(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        self.get_collection(ns)
            .count_documents(filter)
            .await
            .map_err(backend_error)
    }

    async fn save(&self, ns: &Namespace, document: Document) -> DocumentStoreResult<ObjectId> {
        let document = KeySanitizer::sanitize_document(document);
        let collection = self.get_collection(ns);

        match document.get(ID_KEY) {
            Some(Bson::ObjectId(id)) => {
                let id = *id;
                collection
                    .replace_one(doc! { ID_KEY: id }, document)
                    .upsert(true)
                    .await
                    .map_err(backend_error)?;
                Ok(id)
            }
            Some(other) => Err(DocumentStoreError::InvalidIdentifier(other.to_string())),
            None => collection
                .insert_one(document)
                .await
                .map_err(backend_error)?
                .inserted_id
                .as_object_id()
                .ok_or_else(|| DocumentStoreError::Backend("server generated a non-ObjectId identifier".into())),
        }
    }

    async fn remove(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        Ok(
            self.get_collection(ns)
                .delete_many(filter)
                .await
                .map_err(backend_error)?
                .deleted_count
        )
    }

    async fn find_and_modify(
        &self,
        ns: &Namespace,
        request: FindAndModify,
    ) -> DocumentStoreResult<Option<Document>> {
        let collection = self.get_collection(ns);
        let return_document = if request.new { ReturnDocument::After } else { ReturnDocument::Before };

        let found = match request.update {
            _ if request.remove => {
                let mut options = FindOneAndDeleteOptions::default();
                options.sort = sort_option(&request.sort);
                collection
                    .find_one_and_delete(request.query)
                    .with_options(options)
                    .await
            }
            Some(update) if is_operator_document(&update) => {
                let mut options = FindOneAndUpdateOptions::default();
                options.sort = sort_option(&request.sort);
                options.upsert = Some(request.upsert);
                options.return_document = Some(return_document);
                collection
                    .find_one_and_update(request.query, update)
                    .with_options(options)
                    .await
            }
            Some(replacement) => {
                let mut options = FindOneAndReplaceOptions::default();
                options.sort = sort_option(&request.sort);
                options.upsert = Some(request.upsert);
                options.return_document = Some(return_document);
                collection
                    .find_one_and_replace(request.query, KeySanitizer::sanitize_document(replacement))
                    .with_options(options)
                    .await
            }
            None => {
                return Err(DocumentStoreError::InvalidQuery(
                    "find_and_modify needs an update or the remove flag".into(),
                ));
            }
        };

        Ok(found.map_err(backend_error)?.map(KeySanitizer::restore_document))
    }

    async fn create_index(&self, ns: &Namespace, index: IndexSpec) -> DocumentStoreResult<()> {
        let mut options = IndexOptions::default();
        options.unique = Some(index.unique);
        options.sparse = Some(index.sparse);
        options.name = index.name;

        self.get_collection(ns)
            .create_index(
                IndexModel::builder()
                    .keys(Sort::to_document(&index.keys))
                    .options(options)
                    .build()
            )
            .await
            .map_err(backend_error)?;

        tracing::debug!(collection = %ns, "index ensured");
        Ok(())
    }

    async fn drop_collection(&self, ns: &Namespace) -> DocumentStoreResult<()> {
        self.get_collection(ns)
            .drop()
            .await
            .map_err(backend_error)
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        names.sort();
        Ok(names)
    }

    async fn blobs(&self, database: &str) -> DocumentStoreResult<Arc<dyn BlobStore>> {
        Ok(Arc::new(MongoBlobStore::new(
            self.client.database(database).gridfs_bucket(None),
        )))
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// Blob store backed by a GridFS bucket.
#[derive(Debug, Clone)]
pub struct MongoBlobStore {
    bucket: GridFsBucket,
}

impl MongoBlobStore {
    pub fn new(bucket: GridFsBucket) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl BlobStore for MongoBlobStore {
    async fn put(&self, data: Vec<u8>) -> DocumentStoreResult<ObjectId> {
        let id = ObjectId::new();
        let mut upload = self.bucket
            .open_upload_stream(id.to_hex())
            .id(Bson::ObjectId(id))
            .await
            .map_err(backend_error)?;

        upload.write_all(&data).await.map_err(|e| DocumentStoreError::Backend(e.to_string()))?;
        upload.close().await.map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> DocumentStoreResult<Option<Vec<u8>>> {
        let mut download = match self.bucket.open_download_stream(Bson::ObjectId(*id)).await {
            Ok(download) => download,
            Err(e) if is_missing_file(&e) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };

        let mut data = Vec::new();
        download
            .read_to_end(&mut data)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(Some(data))
    }

    async fn delete(&self, id: &ObjectId) -> DocumentStoreResult<()> {
        match self.bucket.delete(Bson::ObjectId(*id)).await {
            Ok(()) => Ok(()),
            Err(e) if is_missing_file(&e) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }
}

/// Opens a [`MongoStore`] per server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, endpoint: &Endpoint) -> DocumentStoreResult<Arc<dyn StoreBackend>> {
        tracing::debug!(endpoint = %endpoint, "opening mongodb client");
        Ok(Arc::new(MongoStore::connect(&endpoint.uri).await?))
    }
}
