//! Field protocol.
//!
//! A model is a plain struct; each persisted member is paired at
//! registration time with a [`Field`] descriptor that knows the member's
//! attribute name, its storage key, its default and how to reach the member
//! through a pair of accessor functions. Descriptors are shared by every
//! instance of the model and never hold per-instance state.
//!
//! Member types implement [`Slot`], which coerces incoming BSON values and
//! exposes the raw stored value:
//!
//! | member type              | kind                    |
//! |--------------------------|-------------------------|
//! | `Option<bool>`           | boolean (default false) |
//! | `Option<i64>`            | integer (default 0)     |
//! | `Option<f64>`            | float                   |
//! | `Option<String>`         | string                  |
//! | `Option<ObjectId>`       | identifier              |
//! | `Option<DateTime<Utc>>`  | timestamp               |
//! | `Option<M>` (a schema)   | embedded model          |
//! | `Vec<T>`                 | list, or embedded-model list |
//! | `BTreeMap<String, T>`    | mapping                 |
//! | [`Reference<M>`]         | reference               |
//! | [`FileBlob`]             | file blob               |
//!
//! `None` is the "never set" state. Collections are always materialized, so
//! they are never absent.

use bson::{Bson, Document, oid::ObjectId};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, fmt, marker::PhantomData};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    id,
};

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Identifier,
    Boolean,
    Integer,
    Float,
    String,
    Timestamp,
    Reference,
    List,
    Map,
    Embedded,
    EmbeddedList,
    Sequence,
    FileBlob,
    Raw,
}

/// When a timestamp field is stamped with the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoStamp {
    #[default]
    Never,
    /// Once, when a new instance is first saved and the field is unset.
    OnCreate,
    /// On every save.
    Always,
}

/// A value type that can be stored in a document.
pub trait Coerce: Sized + Clone + Send + Sync + 'static {
    fn kind() -> FieldKind;

    fn to_bson(&self) -> Bson;

    /// Converts a stored or assigned value into `Self`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::TypeCoercion`] when the value cannot be
    /// converted, or [`DocumentStoreError::InvalidIdentifier`] for a malformed
    /// identifier string.
    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self>;
}

impl Coerce for bool {
    fn kind() -> FieldKind {
        FieldKind::Boolean
    }

    fn to_bson(&self) -> Bson {
        Bson::Boolean(*self)
    }

    fn coerce(_field: &str, value: Bson) -> DocumentStoreResult<Self> {
        Ok(match value {
            Bson::Boolean(flag) => flag,
            Bson::Int32(n) => n != 0,
            Bson::Int64(n) => n != 0,
            Bson::Double(n) => n != 0.0,
            Bson::String(s) => !s.is_empty(),
            Bson::Array(items) => !items.is_empty(),
            Bson::Document(doc) => !doc.is_empty(),
            Bson::Null | Bson::Undefined => false,
            _ => true,
        })
    }
}

/// Doubles that truncate to a representable `i64`.
const I64_AS_FLOAT: std::ops::Range<f64> = (i64::MIN as f64)..-(i64::MIN as f64);

impl Coerce for i64 {
    fn kind() -> FieldKind {
        FieldKind::Integer
    }

    fn to_bson(&self) -> Bson {
        Bson::Int64(*self)
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Int32(n) => Ok(i64::from(n)),
            Bson::Int64(n) => Ok(n),
            Bson::Double(n) if I64_AS_FLOAT.contains(&n.trunc()) => Ok(n.trunc() as i64),
            Bson::Boolean(flag) => Ok(i64::from(flag)),
            Bson::String(ref s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| DocumentStoreError::coercion(field, "integer", &value)),
            other => Err(DocumentStoreError::coercion(field, "integer", &other)),
        }
    }
}

impl Coerce for f64 {
    fn kind() -> FieldKind {
        FieldKind::Float
    }

    fn to_bson(&self) -> Bson {
        Bson::Double(*self)
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Double(n) => Ok(n),
            Bson::Int32(n) => Ok(f64::from(n)),
            Bson::Int64(n) => Ok(n as f64),
            Bson::Boolean(flag) => Ok(if flag { 1.0 } else { 0.0 }),
            Bson::String(ref s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| DocumentStoreError::coercion(field, "float", &value)),
            other => Err(DocumentStoreError::coercion(field, "float", &other)),
        }
    }
}

impl Coerce for String {
    fn kind() -> FieldKind {
        FieldKind::String
    }

    fn to_bson(&self) -> Bson {
        Bson::String(self.clone())
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::String(s) | Bson::Symbol(s) => Ok(s),
            Bson::Int32(n) => Ok(n.to_string()),
            Bson::Int64(n) => Ok(n.to_string()),
            Bson::Double(n) => Ok(n.to_string()),
            Bson::Boolean(flag) => Ok(flag.to_string()),
            Bson::ObjectId(id) => Ok(id.to_hex()),
            other => Err(DocumentStoreError::coercion(field, "string", &other)),
        }
    }
}

impl Coerce for ObjectId {
    fn kind() -> FieldKind {
        FieldKind::Identifier
    }

    fn to_bson(&self) -> Bson {
        Bson::ObjectId(*self)
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::ObjectId(id) => Ok(id),
            Bson::String(s) => id::parse(&s),
            other => Err(DocumentStoreError::coercion(field, "object id", &other)),
        }
    }
}

impl Coerce for DateTime<Utc> {
    fn kind() -> FieldKind {
        FieldKind::Timestamp
    }

    fn to_bson(&self) -> Bson {
        Bson::DateTime(bson::DateTime::from_chrono(*self))
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::DateTime(dt) => Ok(dt.to_chrono()),
            Bson::Int64(millis) => Ok(bson::DateTime::from_millis(millis).to_chrono()),
            Bson::String(ref s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| DocumentStoreError::coercion(field, "timestamp", &value)),
            other => Err(DocumentStoreError::coercion(field, "timestamp", &other)),
        }
    }
}

impl Coerce for Document {
    fn kind() -> FieldKind {
        FieldKind::Map
    }

    fn to_bson(&self) -> Bson {
        Bson::Document(self.clone())
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Document(doc) => Ok(doc),
            other => Err(DocumentStoreError::coercion(field, "document", &other)),
        }
    }
}

impl Coerce for Bson {
    fn kind() -> FieldKind {
        FieldKind::Raw
    }

    fn to_bson(&self) -> Bson {
        self.clone()
    }

    fn coerce(_field: &str, value: Bson) -> DocumentStoreResult<Self> {
        Ok(value)
    }
}

impl<T: Coerce> Coerce for Vec<T> {
    fn kind() -> FieldKind {
        if T::kind() == FieldKind::Embedded {
            FieldKind::EmbeddedList
        } else {
            FieldKind::List
        }
    }

    fn to_bson(&self) -> Bson {
        Bson::Array(self.iter().map(Coerce::to_bson).collect())
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Array(items) => items.into_iter().map(|item| T::coerce(field, item)).collect(),
            other => Err(DocumentStoreError::coercion(field, "array", &other)),
        }
    }
}

impl<T: Coerce> Coerce for BTreeMap<String, T> {
    fn kind() -> FieldKind {
        FieldKind::Map
    }

    fn to_bson(&self) -> Bson {
        Bson::Document(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_bson()))
                .collect(),
        )
    }

    fn coerce(field: &str, value: Bson) -> DocumentStoreResult<Self> {
        match value {
            Bson::Document(doc) => doc
                .into_iter()
                .map(|(key, value)| Ok((key, T::coerce(field, value)?)))
                .collect(),
            other => Err(DocumentStoreError::coercion(field, "document", &other)),
        }
    }
}

/// Per-instance storage of one field.
///
/// Object safe apart from [`kind`](Slot::kind), so descriptors can reach any
/// member through `&dyn Slot`.
pub trait Slot: Send + Sync {
    fn kind() -> FieldKind
    where
        Self: Sized;

    /// The stored value, `None` when the field was never set.
    fn raw(&self) -> Option<Bson>;

    /// Coerces and stores `value`.
    fn assign(&mut self, field: &str, value: Bson) -> DocumentStoreResult<()>;

    /// Takes a byte payload waiting to be written to the blob store.
    fn take_payload(&mut self) -> Option<Vec<u8>> {
        None
    }
}

impl<T: Coerce> Slot for Option<T> {
    fn kind() -> FieldKind {
        T::kind()
    }

    fn raw(&self) -> Option<Bson> {
        self.as_ref().map(Coerce::to_bson)
    }

    fn assign(&mut self, field: &str, value: Bson) -> DocumentStoreResult<()> {
        *self = Some(T::coerce(field, value)?);
        Ok(())
    }
}

impl<T: Coerce> Slot for Vec<T> {
    fn kind() -> FieldKind {
        <Vec<T> as Coerce>::kind()
    }

    fn raw(&self) -> Option<Bson> {
        Some(self.to_bson())
    }

    fn assign(&mut self, field: &str, value: Bson) -> DocumentStoreResult<()> {
        *self = Vec::<T>::coerce(field, value)?;
        Ok(())
    }
}

impl<T: Coerce> Slot for BTreeMap<String, T> {
    fn kind() -> FieldKind {
        FieldKind::Map
    }

    fn raw(&self) -> Option<Bson> {
        Some(self.to_bson())
    }

    fn assign(&mut self, field: &str, value: Bson) -> DocumentStoreResult<()> {
        *self = BTreeMap::<String, T>::coerce(field, value)?;
        Ok(())
    }
}

/// Identifier of another model instance.
///
/// Stored as the target's identifier; [`fetch`](Reference::fetch) resolves it
/// through the target model's `get`. The target may be the owning model
/// itself.
pub struct Reference<T> {
    id: Option<ObjectId>,
    _target: PhantomData<fn() -> T>,
}

impl<T> Reference<T> {
    pub fn new() -> Self {
        Reference { id: None, _target: PhantomData }
    }

    pub fn to(id: ObjectId) -> Self {
        Reference { id: Some(id), _target: PhantomData }
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn set_id(&mut self, id: Option<ObjectId>) {
        self.id = id;
    }

    pub fn is_set(&self) -> bool {
        self.id.is_some()
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Reference { id: self.id, _target: PhantomData }
    }
}

impl<T> Default for Reference<T> {
    fn default() -> Self {
        Reference::new()
    }
}

impl<T> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reference").field(&self.id).finish()
    }
}

impl<T: 'static> Slot for Reference<T> {
    fn kind() -> FieldKind {
        FieldKind::Reference
    }

    fn raw(&self) -> Option<Bson> {
        self.id.map(Bson::ObjectId)
    }

    fn assign(&mut self, field: &str, value: Bson) -> DocumentStoreResult<()> {
        self.id = Some(ObjectId::coerce(field, value)?);
        Ok(())
    }
}

/// Outcome of resolving a [`Reference`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    /// The reference was never set.
    Unset,
    /// The reference is set but the target does not exist.
    Missing,
    Found(T),
}

impl<T> Resolved<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Resolved::Found(target) => Some(target),
            _ => None,
        }
    }
}

/// Handle to a payload in the blob store.
///
/// [`write`](FileBlob::write) stages bytes; the next save stores them as a new
/// blob, points the field at it and deletes the blob it replaced. Assigning a
/// binary value through the name-based entry points stages it the same way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileBlob {
    id: Option<ObjectId>,
    pending: Option<Vec<u8>>,
}

impl FileBlob {
    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn write(&mut self, data: impl Into<Vec<u8>>) {
        self.pending = Some(data.into());
    }

    /// Whether a payload waits to be written.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }
}

impl Slot for FileBlob {
    fn kind() -> FieldKind {
        FieldKind::FileBlob
    }

    fn raw(&self) -> Option<Bson> {
        self.id.map(Bson::ObjectId)
    }

    fn assign(&mut self, field: &str, value: Bson) -> DocumentStoreResult<()> {
        match value {
            Bson::Binary(binary) => self.pending = Some(binary.bytes),
            other => self.id = Some(ObjectId::coerce(field, other)?),
        }
        Ok(())
    }

    fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.pending.take()
    }
}

/// Member types that accept a declared default of type `Value`.
pub trait HasDefault: Slot + Default {
    type Value: Coerce;
}

impl<T: Coerce> HasDefault for Option<T> {
    type Value = T;
}

impl<T: Coerce> HasDefault for Vec<T> {
    type Value = Vec<T>;
}

impl<T: Coerce> HasDefault for BTreeMap<String, T> {
    type Value = BTreeMap<String, T>;
}

impl<T: 'static> HasDefault for Reference<T> {
    type Value = ObjectId;
}

impl HasDefault for FileBlob {
    type Value = ObjectId;
}

/// Coerces `value` the way a member of type `S` stores it.
fn normalize<S: Slot + Default>(field: &str, value: Bson) -> DocumentStoreResult<Bson> {
    let mut slot = S::default();
    slot.assign(field, value)?;
    Ok(slot.raw().unwrap_or(Bson::Null))
}

/// Descriptor binding one struct member of `M` to a document key.
pub struct Field<M> {
    name: String,
    key: String,
    kind: FieldKind,
    default: Option<Bson>,
    auto: AutoStamp,
    sequence: Option<String>,
    view: fn(&M) -> &dyn Slot,
    slot: fn(&mut M) -> &mut dyn Slot,
    normalize: fn(&str, Bson) -> DocumentStoreResult<Bson>,
}

impl<M> Field<M> {
    /// Describes a member of type `S` reached through `view` and `slot`.
    pub fn new<S: Slot + Default>(name: &str, view: fn(&M) -> &dyn Slot, slot: fn(&mut M) -> &mut dyn Slot) -> Self {
        Field {
            name: name.to_string(),
            key: name.to_string(),
            kind: S::kind(),
            default: None,
            auto: AutoStamp::Never,
            sequence: None,
            view,
            slot,
            normalize: normalize::<S>,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Sets the value read while the member is unset, coerced to the
    /// member's type.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::TypeCoercion`] when the default does not
    /// fit the member.
    pub fn with_default(mut self, default: impl Into<Bson>) -> DocumentStoreResult<Self> {
        self.default = Some((self.normalize)(&self.name, default.into())?);
        Ok(self)
    }

    /// Sets a default whose type the compiler checks against the member
    /// type `S`. This is what `#[field(default = ..)]` expands to.
    pub fn with_typed_default<S: HasDefault, V: Into<S::Value>>(mut self, default: V) -> Self {
        let value: S::Value = default.into();
        self.default = Some(value.to_bson());
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto = AutoStamp::Always;
        self
    }

    pub fn auto_now_on_create(mut self) -> Self {
        self.auto = AutoStamp::OnCreate;
        self
    }

    /// Draws the value from the named counter when a new instance is saved.
    pub fn sequence(mut self, counter: impl Into<String>) -> Self {
        self.sequence = Some(counter.into());
        self.kind = FieldKind::Sequence;
        self
    }

    pub(crate) fn into_identifier(mut self) -> Self {
        self.key = id::ID_KEY.to_string();
        self.kind = FieldKind::Identifier;
        self
    }

    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn auto_stamp(&self) -> AutoStamp {
        self.auto
    }

    pub fn sequence_name(&self) -> Option<&str> {
        self.sequence.as_deref()
    }

    /// The value read when the field was never set.
    pub fn default_value(&self) -> Bson {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match self.kind {
            FieldKind::Boolean => Bson::Boolean(false),
            FieldKind::Integer | FieldKind::Sequence => Bson::Int64(0),
            FieldKind::List | FieldKind::EmbeddedList => Bson::Array(Vec::new()),
            FieldKind::Map => Bson::Document(Document::new()),
            _ => Bson::Null,
        }
    }

    /// The raw stored value, `None` when never set.
    pub fn get_raw(&self, model: &M) -> Option<Bson> {
        (self.view)(model).raw()
    }

    /// The stored value, or the default when never set.
    pub fn get(&self, model: &M) -> Bson {
        self.get_raw(model).unwrap_or_else(|| self.default_value())
    }

    /// Coerces and stores `value`. Assigning null leaves the field untouched.
    pub fn set(&self, model: &mut M, value: impl Into<Bson>) -> DocumentStoreResult<()> {
        match value.into() {
            Bson::Null | Bson::Undefined => Ok(()),
            value => (self.slot)(model).assign(&self.name, value),
        }
    }

    pub(crate) fn take_payload(&self, model: &mut M) -> Option<Vec<u8>> {
        (self.slot)(model).take_payload()
    }

    /// Stamps an auto timestamp. Returns whether the field changed.
    pub(crate) fn stamp(&self, model: &mut M, now: DateTime<Utc>, new: bool) -> DocumentStoreResult<bool> {
        let stamp = match self.auto {
            AutoStamp::Always => true,
            AutoStamp::OnCreate => new && self.get_raw(model).is_none(),
            AutoStamp::Never => false,
        };
        if stamp {
            self.set(model, now.to_bson())?;
        }
        Ok(stamp)
    }
}

impl<M> fmt::Debug for Field<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("auto", &self.auto)
            .field("sequence", &self.sequence)
            .finish()
    }
}
