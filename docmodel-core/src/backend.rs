//! Document-store driver abstraction.
//!
//! This module defines the contract every storage driver implements so the
//! mapping core can persist and query models without knowing the concrete
//! database underneath.
//!
//! # Traits
//!
//! - [`StoreBackend`]: collection-scoped document operations
//! - [`BlobStore`]: opaque byte blobs addressed by identifier
//! - [`Connector`]: factory producing a driver for an [`Endpoint`]
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{Namespace, StoreBackend};
//! use bson::doc;
//!
//! let ns = Namespace::new("modeltest", "post");
//! let id = backend.save(&ns, doc! { "title": "hello" }).await?;
//! let found = backend.find_one(&ns, doc! { "_id": id }).await?;
//! ```

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use std::{fmt, sync::Arc};

use crate::{
    config::Endpoint,
    error::DocumentStoreResult,
    query::{FindAndModify, IndexSpec, Query},
};

/// A fully qualified collection: database name plus collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Namespace {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Abstract interface for document-store drivers.
///
/// Implementers provide the storage primitives the mapping core is built
/// on. Documents are plain BSON documents whose keys may be arbitrary text;
/// the identifier lives under `_id`.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from
/// multiple async tasks. Every read-modify-write pattern in the mapping core
/// is delegated to [`find_and_modify`](StoreBackend::find_and_modify), so
/// that operation must be atomic with respect to every other operation on
/// the same collection.
///
/// # Error Handling
///
/// Transport and server failures surface as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend)
/// and are never retried by the caller.
#[async_trait]
pub trait StoreBackend: Send + Sync + fmt::Debug {
    /// Returns every document matching the query.
    ///
    /// # Arguments
    ///
    /// * `ns` - The collection to query
    /// * `query` - Filter, sort, skip and limit, applied in that order
    ///
    /// # Returns
    ///
    /// Returns the matching documents in sort order, or insertion order when
    /// the query carries no sort.
    async fn find(&self, ns: &Namespace, query: Query) -> DocumentStoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<Option<Document>>;

    /// Counts the documents matching `filter`.
    async fn count(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64>;

    /// Persists a document.
    ///
    /// A document without `_id` is inserted under a freshly generated
    /// identifier. A document carrying `_id` replaces the stored document with
    /// that identifier wholesale, inserting it when absent.
    ///
    /// # Returns
    ///
    /// Returns the identifier the document was stored under.
    async fn save(&self, ns: &Namespace, document: Document) -> DocumentStoreResult<ObjectId>;

    /// Deletes every document matching `filter`.
    ///
    /// # Returns
    ///
    /// Returns the number of documents deleted.
    async fn remove(&self, ns: &Namespace, filter: Document) -> DocumentStoreResult<u64>;

    /// Atomically updates or removes the first document matching the request.
    ///
    /// # Arguments
    ///
    /// * `ns` - The collection to modify
    /// * `request` - Query, optional sort, and either an update document or
    ///   the remove flag; `upsert` and `new` as in [`FindAndModify`]
    ///
    /// # Returns
    ///
    /// Returns the pre- or post-modification document depending on
    /// `request.new`, or `None` when nothing matched (and nothing was
    /// upserted).
    async fn find_and_modify(
        &self,
        ns: &Namespace,
        request: FindAndModify,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Creates an index. Idempotent.
    async fn create_index(&self, ns: &Namespace, index: IndexSpec) -> DocumentStoreResult<()>;

    /// Drops a collection and everything in it.
    async fn drop_collection(&self, ns: &Namespace) -> DocumentStoreResult<()>;

    /// Lists the collection names of a database.
    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>>;

    /// Returns the blob store of a database.
    async fn blobs(&self, database: &str) -> DocumentStoreResult<Arc<dyn BlobStore>>;

    /// Releases driver resources. The driver must not be used afterwards.
    async fn shutdown(&self) -> DocumentStoreResult<()>;
}

/// Store of opaque byte payloads, used by file-blob fields.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Writes a new blob and returns its identifier.
    async fn put(&self, data: Vec<u8>) -> DocumentStoreResult<ObjectId>;

    /// Reads a blob, `None` when it does not exist.
    async fn get(&self, id: &ObjectId) -> DocumentStoreResult<Option<Vec<u8>>>;

    /// Deletes a blob. Deleting a missing blob is not an error.
    async fn delete(&self, id: &ObjectId) -> DocumentStoreResult<()>;
}

/// Factory for drivers, installed into the connection [`pool`](crate::pool).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a driver for the given endpoint.
    async fn connect(&self, endpoint: &Endpoint) -> DocumentStoreResult<Arc<dyn StoreBackend>>;
}
