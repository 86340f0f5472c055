//! Update documents applied to in-memory documents.
//!
//! Supports `$set`, `$unset`, `$inc`, `$push` and `$setOnInsert`, or a full
//! replacement document (no operator keys). The identifier never changes.

use bson::{Bson, Document};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    id::ID_KEY,
    query::is_operator_document,
};

/// Applies `update` to `document`. `inserting` enables `$setOnInsert`.
pub(crate) fn apply(document: &mut Document, update: &Document, inserting: bool) -> DocumentStoreResult<()> {
    if !update.keys().any(|key| key.starts_with('$')) {
        let id = document.get(ID_KEY).cloned();
        *document = update.clone();
        if let Some(id) = id {
            document.insert(ID_KEY, id);
        }
        return Ok(());
    }

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DocumentStoreError::InvalidQuery(format!("{operator} expects a document")));
        };

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$setOnInsert" if inserting => set_path(document, path, value.clone())?,
                "$setOnInsert" => {}
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let current = document_path(document, path).cloned();
                    set_path(document, path, increment(path, current, value)?)?;
                }
                "$push" => {
                    let mut items = match document_path(document, path).cloned() {
                        None | Some(Bson::Null) => Vec::new(),
                        Some(Bson::Array(items)) => items,
                        Some(_) => {
                            return Err(DocumentStoreError::InvalidQuery(format!("$push target {path} is not an array")));
                        }
                    };
                    items.push(value.clone());
                    set_path(document, path, Bson::Array(items))?;
                }
                other => {
                    return Err(DocumentStoreError::InvalidQuery(format!("unsupported update operator {other}")));
                }
            }
        }
    }
    Ok(())
}

/// Builds the document an upsert starts from: the literal equality terms of
/// the query.
pub(crate) fn seed(query: &Document) -> Document {
    let mut document = Document::new();
    for (key, value) in query {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(operators) if is_operator_document(operators) => {
                if let Some(value) = operators.get("$eq") {
                    document.insert(key.clone(), value.clone());
                }
            }
            literal => {
                document.insert(key.clone(), literal.clone());
            }
        }
    }
    document
}

fn increment(path: &str, current: Option<Bson>, by: &Bson) -> DocumentStoreResult<Bson> {
    let invalid = || DocumentStoreError::InvalidQuery(format!("cannot $inc {path} by {by}"));
    Ok(match (current.unwrap_or(Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => a.checked_add(*b).map_or(Bson::Int64(i64::from(a) + i64::from(*b)), Bson::Int32),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(a) + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(a as f64 + b),
        (Bson::Null, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => by.clone(),
        _ => return Err(invalid()),
    })
}

fn document_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    crate::evaluator::lookup(document, path)
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                if document.get(head).is_some_and(|existing| *existing != Bson::Null) {
                    return Err(DocumentStoreError::InvalidQuery(format!("cannot set {path} inside a non-document")));
                }
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(child)) => set_path(child, rest, value),
                _ => Err(DocumentStoreError::InvalidQuery(format!("cannot set {path}"))),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}
