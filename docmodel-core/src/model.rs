//! Persisted models and their lifecycle.
//!
//! A model is a schema type that lives in a collection. [`Model`] carries the
//! per-type hooks a model may override; [`ModelExt`] is implemented for every
//! model and provides the CRUD and lifecycle operations.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Schema)]
//! struct UserTag {
//!     id: Option<ObjectId>,
//!     user: Option<String>,
//!     tag: Option<String>,
//!     count: Option<i64>,
//! }
//!
//! #[async_trait]
//! impl Model for UserTag {}
//!
//! let mut tag = UserTag::with(doc! { "user": "Jack", "tag": "Food" })?;
//! tag.save().await?;
//! let same = UserTag::get(tag.id().unwrap()).await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use crate::{
    backend::{BlobStore, Namespace, StoreBackend},
    cache,
    config::{self, Endpoint},
    cursor::Cursor,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{FieldKind, Reference, Resolved},
    id::IntoObjectId,
    pool,
    query::{Conditions, FindAndModify, IndexSpec, Query, Sort},
    schema::{HasIdentifier, Schema},
    sequence,
    signal::{Sender, Signal, SignalEvent, signals},
};

/// Per-type configuration and hooks of a persisted model.
///
/// Everything has a default, so `impl Model for Post {}` is a complete
/// implementation.
#[async_trait]
pub trait Model: Schema + HasIdentifier + Clone + Debug + Default {
    /// Endpoint overriding the process default for this model.
    fn endpoint() -> Option<Endpoint> {
        None
    }

    /// Whether `get` consults and fills the identity cache.
    fn use_identity_cache() -> bool {
        true
    }

    /// Indexes created by [`ModelExt::ensure_indexes`]. Keys may be attribute
    /// names.
    fn index_list() -> Vec<IndexSpec> {
        Vec::new()
    }

    /// Runs once after a new instance was first written, after the
    /// `PostCreate` signal.
    async fn on_created(&mut self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Identity of a persisted instance: its model type and identifier.
///
/// Instances of the same model saved under the same identifier share an
/// identity whatever their field values; unsaved instances have none. Use it
/// to key maps and sets by instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    model: TypeId,
    id: ObjectId,
}

impl Identity {
    pub fn of<M: Model>(id: ObjectId) -> Self {
        Identity { model: TypeId::of::<M>(), id }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}

/// Operations available on every [`Model`].
#[async_trait]
pub trait ModelExt: Model {
    /// The identifier, `None` until the first save.
    fn id(&self) -> Option<ObjectId>;

    fn set_id(&mut self, id: ObjectId) -> DocumentStoreResult<()>;

    /// The identity of a saved instance, `None` until the first save.
    fn identity(&self) -> Option<Identity>;

    /// Identity comparison: both persisted under the same identifier. Two
    /// unsaved instances are never the same.
    fn is_same(&self, other: &Self) -> bool;

    fn collection_name() -> &'static str;

    /// The endpoint this model is stored at.
    fn model_endpoint() -> Endpoint;

    fn namespace() -> Namespace;

    /// Shadow collection used by [`recycle`](Self::recycle) and
    /// [`revive`](Self::revive).
    fn recycle_namespace() -> Namespace;

    /// Rehydrates an instance from a stored document.
    fn from_document(doc: Document) -> DocumentStoreResult<Self>;

    /// Builds an unsaved instance from keyword data keyed by attribute names
    /// or storage keys. Null values are skipped.
    fn with(values: Document) -> DocumentStoreResult<Self>;

    /// `{storage key: value}` for every field that holds a value.
    fn get_dict(&self) -> Document;

    fn to_json(&self) -> DocumentStoreResult<serde_json::Value>;

    /// Reads a field by attribute name or storage key.
    fn get_field(&self, name: &str) -> DocumentStoreResult<Bson>;

    /// Assigns a field by attribute name or storage key. Null is a no-op.
    fn set_field(&mut self, name: &str, value: Bson) -> DocumentStoreResult<()>;

    /// Rewrites conditions keyed by attribute names into storage keys.
    fn filter_condition<C: Into<Conditions>>(conditions: C) -> Document;

    /// A lazy cursor over the instances matching `conditions`.
    fn find<C: Into<Conditions>>(conditions: C) -> Cursor<Self>;

    /// A lazy cursor over every instance.
    fn all() -> Cursor<Self>;

    /// The pooled driver for this model's endpoint.
    async fn connection() -> DocumentStoreResult<Arc<dyn StoreBackend>>;

    /// Builds an instance from keyword data and saves it.
    async fn create(values: Document) -> DocumentStoreResult<Self>;

    /// Loads an instance by identifier. Malformed string identifiers read as
    /// not found.
    async fn get<I: IntoObjectId + Send>(id: I) -> DocumentStoreResult<Option<Self>>;

    /// Loads many instances with one query. The result has one slot per
    /// input identifier, in input order, `None` where nothing was found.
    async fn multi_get<I: IntoObjectId + Send>(ids: Vec<I>) -> DocumentStoreResult<Vec<Option<Self>>>;

    /// Like [`multi_get`](Self::multi_get) without the gaps.
    async fn multi_get_compact<I: IntoObjectId + Send>(ids: Vec<I>) -> DocumentStoreResult<Vec<Self>>;

    async fn find_one<C: Into<Conditions> + Send>(conditions: C) -> DocumentStoreResult<Option<Self>>;

    /// Number of stored instances.
    async fn count() -> DocumentStoreResult<u64>;

    /// Deletes every instance matching `conditions`.
    async fn remove<C: Into<Conditions> + Send>(conditions: C) -> DocumentStoreResult<u64>;

    /// Atomic update-or-remove of one instance. Clears this model's identity
    /// cache.
    async fn find_and_modify(request: FindAndModify) -> DocumentStoreResult<Option<Self>>;

    /// Atomically adds `by` to an integer field of the first match and
    /// returns the updated instance.
    async fn increment_field<C: Into<Conditions> + Send>(
        conditions: C,
        field: &str,
        by: i64,
    ) -> DocumentStoreResult<Option<Self>>;

    /// Atomically removes the first match and returns it.
    async fn find_and_remove<C: Into<Conditions> + Send>(conditions: C) -> DocumentStoreResult<Option<Self>>;

    /// Inserts a new instance or replaces the stored one.
    async fn save(&mut self) -> DocumentStoreResult<()>;

    /// Deletes the stored document. A never-saved instance is left alone.
    async fn erase(&self) -> DocumentStoreResult<()>;

    /// Moves the stored document into the recycle bin.
    async fn recycle(&self) -> DocumentStoreResult<()>;

    /// Restores a recycled document and loads it.
    async fn revive<I: IntoObjectId + Send>(id: I) -> DocumentStoreResult<Option<Self>>;

    /// Creates every index of [`Model::index_list`].
    async fn ensure_indexes() -> DocumentStoreResult<()>;

    /// Reads the payload a file-blob field points at.
    async fn read_blob(&self, field: &str) -> DocumentStoreResult<Option<Vec<u8>>>;
}

fn fire<M: Model>(signal: Signal, model: &M) -> DocumentStoreResult<()> {
    let event = SignalEvent::new(
        signal,
        Sender::model::<M>(),
        M::schema().collection_name(),
        model.id(),
        model,
    );
    signals().send(&event)
}

fn resolve_id<M: Model, I: IntoObjectId>(id: I) -> DocumentStoreResult<Option<ObjectId>> {
    match id.into_object_id() {
        Ok(id) => Ok(Some(id)),
        Err(DocumentStoreError::InvalidIdentifier(raw)) => {
            tracing::warn!(model = M::schema().type_name(), id = %raw, "malformed identifier read as not found");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Blobs written ahead of a document write.
///
/// The blobs they replace stay in place until the document write commits;
/// a failed write deletes the new blobs instead.
#[derive(Default)]
struct StagedBlobs {
    store: Option<Arc<dyn BlobStore>>,
    written: Vec<ObjectId>,
    replaced: Vec<ObjectId>,
}

impl StagedBlobs {
    /// Writes every pending payload of `model` and points its fields at the
    /// new blobs.
    async fn stage<M: Model>(model: &mut M, backend: &dyn StoreBackend, database: &str) -> DocumentStoreResult<Self> {
        let mut staged = StagedBlobs::default();
        if let Err(err) = staged.write(model, backend, database).await {
            staged.discard().await;
            return Err(err);
        }
        Ok(staged)
    }

    async fn write<M: Model>(&mut self, model: &mut M, backend: &dyn StoreBackend, database: &str) -> DocumentStoreResult<()> {
        for field in M::schema().fields() {
            let Some(payload) = field.take_payload(model) else {
                continue;
            };

            let blobs = match self.store.clone() {
                Some(blobs) => blobs,
                None => {
                    let blobs = backend.blobs(database).await?;
                    self.store = Some(blobs.clone());
                    blobs
                }
            };
            let previous = field.get_raw(model).and_then(|value| value.as_object_id());
            let id = blobs.put(payload).await?;
            self.written.push(id);
            field.set(model, id)?;
            self.replaced.extend(previous);
            tracing::debug!(field = field.name(), blob = %id, "blob staged");
        }
        Ok(())
    }

    /// Deletes the replaced blobs once the document no longer points at them.
    async fn commit(self) {
        let Some(blobs) = self.store else {
            return;
        };
        for id in &self.replaced {
            if let Err(err) = blobs.delete(id).await {
                tracing::warn!(blob = %id, error = %err, "replaced blob left behind");
            }
        }
    }

    /// Deletes the blobs written for a document write that failed.
    async fn discard(&self) {
        let Some(blobs) = &self.store else {
            return;
        };
        for id in &self.written {
            if let Err(err) = blobs.delete(id).await {
                tracing::warn!(blob = %id, error = %err, "staged blob left behind");
            }
        }
    }
}

#[async_trait]
impl<M: Model> ModelExt for M {
    fn id(&self) -> Option<ObjectId> {
        M::schema()
            .identifier()
            .and_then(|field| field.get_raw(self))
            .and_then(|value| value.as_object_id())
    }

    fn set_id(&mut self, id: ObjectId) -> DocumentStoreResult<()> {
        let schema = M::schema();
        match schema.identifier() {
            Some(field) => field.set(self, id),
            None => Err(DocumentStoreError::InvalidDocument(format!(
                "{} has no identifier field",
                schema.type_name()
            ))),
        }
    }

    fn identity(&self) -> Option<Identity> {
        self.id().map(Identity::of::<M>)
    }

    fn is_same(&self, other: &Self) -> bool {
        matches!((self.identity(), other.identity()), (Some(left), Some(right)) if left == right)
    }

    fn collection_name() -> &'static str {
        M::schema().collection_name()
    }

    fn model_endpoint() -> Endpoint {
        M::endpoint().unwrap_or_else(config::default_endpoint)
    }

    fn namespace() -> Namespace {
        Namespace::new(M::model_endpoint().database, M::collection_name())
    }

    fn recycle_namespace() -> Namespace {
        Namespace::new(
            M::model_endpoint().database,
            format!("{}_recycle_bin", M::collection_name()),
        )
    }

    fn from_document(doc: Document) -> DocumentStoreResult<Self> {
        M::schema().from_document(doc)
    }

    fn with(values: Document) -> DocumentStoreResult<Self> {
        M::schema().from_document(values)
    }

    fn get_dict(&self) -> Document {
        M::schema().to_document(self)
    }

    fn to_json(&self) -> DocumentStoreResult<serde_json::Value> {
        Ok(serde_json::to_value(Bson::Document(self.get_dict()))?)
    }

    fn get_field(&self, name: &str) -> DocumentStoreResult<Bson> {
        Ok(M::schema().require(name)?.get(self))
    }

    fn set_field(&mut self, name: &str, value: Bson) -> DocumentStoreResult<()> {
        M::schema().require(name)?.set(self, value)
    }

    fn filter_condition<C: Into<Conditions>>(conditions: C) -> Document {
        M::schema().translate(conditions.into().into_document())
    }

    fn find<C: Into<Conditions>>(conditions: C) -> Cursor<Self> {
        Cursor::new(M::filter_condition(conditions))
    }

    fn all() -> Cursor<Self> {
        Cursor::new(Document::new())
    }

    async fn connection() -> DocumentStoreResult<Arc<dyn StoreBackend>> {
        pool::connect(&M::model_endpoint()).await
    }

    async fn create(values: Document) -> DocumentStoreResult<Self> {
        let mut model = M::with(values)?;
        model.save().await?;
        Ok(model)
    }

    async fn get<I: IntoObjectId + Send>(id: I) -> DocumentStoreResult<Option<Self>> {
        let Some(id) = resolve_id::<M, _>(id)? else {
            return Ok(None);
        };

        let caching = M::use_identity_cache();
        if caching {
            if let Some(hit) = cache::get::<M>(&id) {
                return Ok(Some(hit));
            }
        }

        let ns = M::namespace();
        tracing::debug!(%ns, %id, "get");
        let Some(doc) = M::connection().await?.find_one(&ns, doc! { "_id": id }).await? else {
            return Ok(None);
        };

        let model = M::from_document(doc)?;
        if caching {
            cache::insert(id, &model);
        }
        Ok(Some(model))
    }

    async fn multi_get<I: IntoObjectId + Send>(ids: Vec<I>) -> DocumentStoreResult<Vec<Option<Self>>> {
        let ids = ids
            .into_iter()
            .map(resolve_id::<M, _>)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        let caching = M::use_identity_cache();
        let mut resolved: HashMap<ObjectId, M> = HashMap::new();
        let mut missing = HashSet::new();
        for id in ids.iter().flatten() {
            match caching.then(|| cache::get::<M>(id)).flatten() {
                Some(hit) => {
                    resolved.insert(*id, hit);
                }
                None => {
                    missing.insert(*id);
                }
            }
        }

        if !missing.is_empty() {
            let ns = M::namespace();
            tracing::debug!(%ns, ids = missing.len(), "multi_get");
            let wanted = missing.into_iter().map(Bson::ObjectId).collect::<Vec<_>>();
            let query = Query::builder().filter(doc! { "_id": { "$in": wanted } }).build();

            for doc in M::connection().await?.find(&ns, query).await? {
                let model = M::from_document(doc)?;
                if let Some(id) = model.id() {
                    if caching {
                        cache::insert(id, &model);
                    }
                    resolved.insert(id, model);
                }
            }
        }

        Ok(ids
            .into_iter()
            .map(|id| id.and_then(|id| resolved.get(&id).cloned()))
            .collect())
    }

    async fn multi_get_compact<I: IntoObjectId + Send>(ids: Vec<I>) -> DocumentStoreResult<Vec<Self>> {
        Ok(M::multi_get(ids).await?.into_iter().flatten().collect())
    }

    async fn find_one<C: Into<Conditions> + Send>(conditions: C) -> DocumentStoreResult<Option<Self>> {
        let filter = M::filter_condition(conditions);
        let ns = M::namespace();
        tracing::debug!(%ns, ?filter, "find_one");
        M::connection()
            .await?
            .find_one(&ns, filter)
            .await?
            .map(M::from_document)
            .transpose()
    }

    async fn count() -> DocumentStoreResult<u64> {
        M::connection().await?.count(&M::namespace(), Document::new()).await
    }

    async fn remove<C: Into<Conditions> + Send>(conditions: C) -> DocumentStoreResult<u64> {
        let filter = M::filter_condition(conditions);
        let ns = M::namespace();
        cache::clear::<M>();
        tracing::debug!(%ns, ?filter, "remove");
        M::connection().await?.remove(&ns, filter).await
    }

    async fn find_and_modify(request: FindAndModify) -> DocumentStoreResult<Option<Self>> {
        let schema = M::schema();
        let request = FindAndModify {
            query: schema.translate(request.query),
            update: request.update.map(|update| schema.translate_update(update)),
            sort: request
                .sort
                .into_iter()
                .map(|sort| Sort {
                    field: schema.storage_key(&sort.field).to_string(),
                    ..sort
                })
                .collect(),
            ..request
        };

        let ns = M::namespace();
        cache::clear::<M>();
        tracing::debug!(%ns, ?request, "find_and_modify");
        M::connection()
            .await?
            .find_and_modify(&ns, request)
            .await?
            .map(M::from_document)
            .transpose()
    }

    async fn increment_field<C: Into<Conditions> + Send>(
        conditions: C,
        field: &str,
        by: i64,
    ) -> DocumentStoreResult<Option<Self>> {
        let key = M::schema().require(field)?.key().to_string();
        let request = FindAndModify::updating(conditions, doc! { "$inc": { key: by } }).return_new(true);
        M::find_and_modify(request).await
    }

    async fn find_and_remove<C: Into<Conditions> + Send>(conditions: C) -> DocumentStoreResult<Option<Self>> {
        M::find_and_modify(FindAndModify::removing(conditions)).await
    }

    async fn save(&mut self) -> DocumentStoreResult<()> {
        let schema = M::schema();
        if schema.identifier().is_none() {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "{} has no identifier field",
                schema.type_name()
            )));
        }

        let ns = M::namespace();
        let backend = M::connection().await?;
        let new = self.id().is_none();

        if new {
            for field in schema.fields() {
                let Some(counter) = field.sequence_name() else {
                    continue;
                };
                if field.get_raw(self).is_none() {
                    let value = sequence::next_value(backend.as_ref(), &ns.database, counter).await?;
                    field.set(self, value)?;
                }
            }
            fire(Signal::PreCreate, self)?;
        } else {
            fire(Signal::PreUpdate, self)?;
            if let Some(id) = self.id() {
                cache::evict::<M>(&id);
            }
        }

        // A failed write leaves the instance as it was, payloads still pending.
        let unsaved = self.clone();

        let now = bson::DateTime::now().to_chrono();
        for field in schema.fields() {
            if let Err(err) = field.stamp(self, now, new) {
                *self = unsaved;
                return Err(err);
            }
        }

        let staged = match StagedBlobs::stage(self, backend.as_ref(), &ns.database).await {
            Ok(staged) => staged,
            Err(err) => {
                *self = unsaved;
                return Err(err);
            }
        };

        let id = match backend.save(&ns, self.get_dict()).await {
            Ok(id) => id,
            Err(err) => {
                staged.discard().await;
                *self = unsaved;
                return Err(err);
            }
        };
        staged.commit().await;
        self.set_id(id)?;
        tracing::debug!(%ns, %id, new, "saved");

        if new {
            if M::use_identity_cache() {
                cache::insert(id, &*self);
            }
            fire(Signal::PostCreate, self)?;
            self.on_created().await?;
        } else {
            fire(Signal::PostUpdate, self)?;
        }
        Ok(())
    }

    async fn erase(&self) -> DocumentStoreResult<()> {
        let Some(id) = self.id() else {
            return Ok(());
        };

        let ns = M::namespace();
        cache::evict::<M>(&id);
        fire(Signal::WillErase, self)?;
        tracing::debug!(%ns, %id, "erase");
        M::connection().await?.remove(&ns, doc! { "_id": id }).await?;
        Ok(())
    }

    async fn recycle(&self) -> DocumentStoreResult<()> {
        let id = self.id().ok_or_else(|| {
            DocumentStoreError::InvalidDocument(format!(
                "cannot recycle an unsaved {}",
                M::schema().type_name()
            ))
        })?;

        let shadow = M::recycle_namespace();
        let stored = M::connection().await?.save(&shadow, self.get_dict()).await?;
        if stored != id {
            return Err(DocumentStoreError::InvariantViolation(format!(
                "{shadow} stored {id} as {stored}"
            )));
        }
        tracing::debug!(%shadow, %id, "recycled");

        fire(Signal::Recycled, self)?;
        self.erase().await
    }

    async fn revive<I: IntoObjectId + Send>(id: I) -> DocumentStoreResult<Option<Self>> {
        let Some(id) = resolve_id::<M, _>(id)? else {
            return Ok(None);
        };

        let backend = M::connection().await?;
        let shadow = M::recycle_namespace();
        let claim = FindAndModify::removing(doc! { "_id": id });
        let Some(doc) = backend.find_and_modify(&shadow, claim).await? else {
            return Ok(None);
        };

        if let Err(err) = backend.save(&M::namespace(), doc.clone()).await {
            tracing::warn!(%shadow, %id, error = %err, "revive failed, returning the document to the recycle bin");
            backend.save(&shadow, doc).await?;
            return Err(err);
        }
        cache::evict::<M>(&id);
        tracing::debug!(%shadow, %id, "revived");

        let model = M::get(id).await?.ok_or_else(|| {
            DocumentStoreError::InvariantViolation(format!("revived {id} vanished from {}", M::namespace()))
        })?;
        fire(Signal::Revived, &model)?;
        Ok(Some(model))
    }

    async fn ensure_indexes() -> DocumentStoreResult<()> {
        let schema = M::schema();
        let ns = M::namespace();
        let backend = M::connection().await?;

        for index in M::index_list() {
            let keys: Vec<Sort> = index
                .keys
                .iter()
                .map(|sort| Sort {
                    field: schema.storage_key(&sort.field).to_string(),
                    direction: sort.direction,
                })
                .collect();
            tracing::debug!(%ns, ?keys, "ensuring index");
            backend.create_index(&ns, IndexSpec { keys, ..index }).await?;
        }
        Ok(())
    }

    async fn read_blob(&self, field: &str) -> DocumentStoreResult<Option<Vec<u8>>> {
        let field = M::schema().require(field)?;
        if field.kind() != FieldKind::FileBlob {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "{} is not a file blob field",
                field.name()
            )));
        }

        let Some(id) = field.get_raw(self).and_then(|value| value.as_object_id()) else {
            return Ok(None);
        };
        let database = M::model_endpoint().database;
        M::connection().await?.blobs(&database).await?.get(&id).await
    }
}

impl<T: Model> Reference<T> {
    /// Points the reference at `target`, which must have been saved.
    pub fn set(&mut self, target: &T) {
        self.set_id(target.id());
    }

    /// Resolves the reference through the target model's `get`.
    pub async fn fetch(&self) -> DocumentStoreResult<Resolved<T>> {
        match self.id() {
            None => Ok(Resolved::Unset),
            Some(id) => Ok(T::get(id).await?.map_or(Resolved::Missing, Resolved::Found)),
        }
    }
}

impl Conditions {
    /// Matches documents whose `key` holds the identifier of `target`.
    pub fn instance<M: Model>(self, key: impl Into<String>, target: &M) -> Self {
        self.eq(key, target.id().map_or(Bson::Null, Bson::ObjectId))
    }
}
