//! Per-type field tables.
//!
//! Every schema type owns exactly one [`ModelSchema`], built on first use and
//! kept for the life of the process. `#[derive(Schema)]` generates the
//! registration; a hand-written implementation looks like this:
//!
//! ```ignore
//! use std::sync::OnceLock;
//! use docmodel::{field::Field, schema::{ModelSchema, Schema}};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Tag {
//!     id: Option<ObjectId>,
//!     label: Option<String>,
//! }
//!
//! impl Schema for Tag {
//!     fn schema() -> &'static ModelSchema<Self> {
//!         static SCHEMA: OnceLock<ModelSchema<Tag>> = OnceLock::new();
//!         SCHEMA.get_or_init(|| {
//!             ModelSchema::register("Tag", None, vec![
//!                 Field::new::<Option<ObjectId>>("id", |m| &m.id, |m| &mut m.id),
//!                 Field::new::<Option<String>>("label", |m| &m.label, |m| &mut m.label),
//!             ])
//!         })
//!     }
//! }
//! ```

use bson::{Bson, Document};
use std::collections::HashMap;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    field::Field,
};

/// Types with a registered field table.
pub trait Schema: Sized + Send + Sync + 'static {
    fn schema() -> &'static ModelSchema<Self>;
}

/// Schema types with an `id: Option<ObjectId>` member.
///
/// `#[derive(Schema)]` implements it when the struct declares `id`.
/// [`Model`](crate::model::Model) requires it, so a model without an
/// identifier does not compile.
#[diagnostic::on_unimplemented(
    message = "`{Self}` has no identifier",
    label = "declare an `id: Option<ObjectId>` member",
    note = "models are stored under their identifier"
)]
pub trait HasIdentifier: Schema {}

/// The field table of a schema type.
#[derive(Debug)]
pub struct ModelSchema<M> {
    type_name: &'static str,
    collection: String,
    fields: Vec<Field<M>>,
    by_name: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
    has_identifier: bool,
}

impl<M> ModelSchema<M> {
    /// Builds the field table of `type_name`.
    ///
    /// The collection name is the lower-cased type name unless overridden. A
    /// field named `id` becomes the identifier: it is stored under `_id` and
    /// moved to the front; the other fields keep their declaration order.
    pub fn register(type_name: &'static str, collection: Option<&str>, fields: Vec<Field<M>>) -> Self {
        let collection = collection.map_or_else(|| type_name.to_lowercase(), str::to_string);

        let mut identifier = None;
        let mut ordered = Vec::with_capacity(fields.len());
        for field in fields {
            if field.name() == "id" && identifier.is_none() {
                identifier = Some(field.into_identifier());
            } else {
                ordered.push(field);
            }
        }
        let has_identifier = identifier.is_some();
        if let Some(identifier) = identifier {
            ordered.insert(0, identifier);
        }

        let mut by_name = HashMap::with_capacity(ordered.len());
        let mut by_key = HashMap::with_capacity(ordered.len());
        for (index, field) in ordered.iter().enumerate() {
            by_name.insert(field.name().to_string(), index);
            if let Some(previous) = by_key.insert(field.key().to_string(), index) {
                tracing::warn!(
                    model = type_name,
                    key = field.key(),
                    shadowed = ordered[previous].name(),
                    "storage key declared twice"
                );
            }
        }

        tracing::debug!(model = type_name, %collection, fields = ordered.len(), "schema registered");

        ModelSchema {
            type_name,
            collection,
            fields: ordered,
            by_name,
            by_key,
            has_identifier,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Fields in storage order, identifier first.
    pub fn fields(&self) -> &[Field<M>] {
        &self.fields
    }

    pub fn identifier(&self) -> Option<&Field<M>> {
        self.has_identifier.then(|| &self.fields[0])
    }

    /// Looks a field up by attribute name, then by storage key.
    pub fn field(&self, name: &str) -> Option<&Field<M>> {
        self.by_name
            .get(name)
            .or_else(|| self.by_key.get(name))
            .map(|&index| &self.fields[index])
    }

    /// Like [`field`](Self::field), failing with
    /// [`DocumentStoreError::UnknownField`].
    pub fn require(&self, name: &str) -> DocumentStoreResult<&Field<M>> {
        self.field(name).ok_or_else(|| DocumentStoreError::UnknownField {
            model: self.type_name.to_string(),
            field: name.to_string(),
        })
    }

    /// The storage key for an attribute name. Unknown names pass through, so
    /// raw storage keys and dotted paths are accepted as is.
    pub fn storage_key<'a>(&'a self, name: &'a str) -> &'a str {
        self.by_name.get(name).map_or(name, |&index| self.fields[index].key())
    }

    /// Serializes every field that holds a value. Fields never set are
    /// omitted so the stored value survives a save that did not touch them.
    pub fn to_document(&self, model: &M) -> Document {
        let mut doc = Document::new();
        for field in &self.fields {
            if let Some(value) = field.get_raw(model) {
                doc.insert(field.key(), value);
            }
        }
        doc
    }

    /// Assigns every known key of `doc` onto `model`. Keys may be storage
    /// keys or attribute names; unknown keys are ignored.
    pub fn populate(&self, model: &mut M, doc: Document) -> DocumentStoreResult<()> {
        for (key, value) in doc {
            match self.by_key.get(&key).or_else(|| self.by_name.get(&key)) {
                Some(&index) => self.fields[index].set(model, value)?,
                None => tracing::trace!(model = self.type_name, %key, "ignoring unknown key"),
            }
        }
        Ok(())
    }

    /// Rewrites attribute names to storage keys, descending into `$and`,
    /// `$or` and `$nor` clauses.
    pub fn translate(&self, conditions: Document) -> Document {
        conditions
            .into_iter()
            .map(|(key, value)| {
                let logical = matches!(key.as_str(), "$and" | "$or" | "$nor");
                match value {
                    Bson::Array(clauses) if logical => {
                        let clauses = clauses
                            .into_iter()
                            .map(|clause| match clause {
                                Bson::Document(clause) => Bson::Document(self.translate(clause)),
                                other => other,
                            })
                            .collect();
                        (key, Bson::Array(clauses))
                    }
                    value => (self.storage_key(&key).to_string(), value),
                }
            })
            .collect()
    }

    /// Translates the field keys of an update document: inside each update
    /// operator, or at the top level of a replacement document.
    pub fn translate_update(&self, update: Document) -> Document {
        update
            .into_iter()
            .map(|(key, value)| match value {
                Bson::Document(fields) if key.starts_with('$') => (key, Bson::Document(self.translate(fields))),
                value => (self.storage_key(&key).to_string(), value),
            })
            .collect()
    }
}

impl<M: Default> ModelSchema<M> {
    /// Builds an instance from a stored or keyword document.
    pub fn from_document(&self, doc: Document) -> DocumentStoreResult<M> {
        let mut model = M::default();
        self.populate(&mut model, doc)?;
        Ok(model)
    }

    pub fn from_bson(&self, value: Bson) -> DocumentStoreResult<M> {
        match value {
            Bson::Document(doc) => self.from_document(doc),
            other => Err(DocumentStoreError::coercion(self.type_name, "document", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Entry {
        title: Option<String>,
        id: Option<ObjectId>,
        hits: Option<i64>,
    }

    fn schema() -> ModelSchema<Entry> {
        ModelSchema::register(
            "BlogEntry",
            None,
            vec![
                Field::new::<Option<String>>("title", |m| &m.title, |m| &mut m.title),
                Field::new::<Option<ObjectId>>("id", |m| &m.id, |m| &mut m.id),
                Field::new::<Option<i64>>("hits", |m: &Entry| &m.hits, |m: &mut Entry| &mut m.hits).with_key("h"),
            ],
        )
    }

    #[test]
    fn identifier_comes_first() {
        let schema = schema();
        assert_eq!(schema.collection_name(), "blogentry");
        let keys = schema.fields().iter().map(Field::key).collect::<Vec<_>>();
        assert_eq!(keys, vec!["_id", "title", "h"]);
        assert_eq!(schema.identifier().map(Field::name), Some("id"));
    }

    #[test]
    fn omits_fields_never_set() {
        let schema = schema();
        let entry = Entry { title: Some("hello".into()), ..Entry::default() };
        assert_eq!(schema.to_document(&entry), doc! { "title": "hello" });

        let entry = Entry { hits: Some(0), ..entry };
        assert_eq!(schema.to_document(&entry), doc! { "title": "hello", "h": 0_i64 });
    }

    #[test]
    fn reconstructs_from_stored_documents() {
        let schema = schema();
        let entry = Entry { id: Some(ObjectId::new()), title: Some("x".into()), hits: Some(4) };

        let mut stored = schema.to_document(&entry);
        stored.insert("legacy", true);
        assert_eq!(schema.from_document(stored).unwrap(), entry);

        let keyword = schema.from_document(doc! { "hits": "7", "title": Bson::Null }).unwrap();
        assert_eq!(keyword.hits, Some(7));
        assert_eq!(keyword.title, None);
    }

    #[test]
    fn translates_names_to_keys() {
        let schema = schema();
        let translated = schema.translate(doc! {
            "id": 1,
            "hits": { "$gt": 2 },
            "$or": [{ "hits": 1 }, { "raw.path": 2 }],
        });
        assert_eq!(
            translated,
            doc! { "_id": 1, "h": { "$gt": 2 }, "$or": [{ "h": 1 }, { "raw.path": 2 }] }
        );

        assert_eq!(
            schema.translate_update(doc! { "$inc": { "hits": 1 }, "title": "t" }),
            doc! { "$inc": { "h": 1 }, "title": "t" }
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            schema().require("nope"),
            Err(DocumentStoreError::UnknownField { field, .. }) if field == "nope"
        ));
    }
}
