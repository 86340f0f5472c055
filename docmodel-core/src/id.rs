//! Object identifiers.
//!
//! The native identifier is [`bson::oid::ObjectId`]. Identifiers can be given
//! either as that type or in their canonical 24-character hex form.

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Storage key of the identifier field in every persisted document.
pub const ID_KEY: &str = "_id";

/// Parses the canonical string form of an identifier.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidIdentifier`] on malformed input.
pub fn parse(value: &str) -> DocumentStoreResult<ObjectId> {
    ObjectId::parse_str(value).map_err(|_| DocumentStoreError::InvalidIdentifier(value.to_string()))
}

/// Creation time embedded in the identifier.
pub fn created_at(id: &ObjectId) -> DateTime<Utc> {
    id.timestamp().to_chrono()
}

/// Values accepted wherever an identifier is expected.
pub trait IntoObjectId {
    fn into_object_id(self) -> DocumentStoreResult<ObjectId>;
}

impl IntoObjectId for ObjectId {
    fn into_object_id(self) -> DocumentStoreResult<ObjectId> {
        Ok(self)
    }
}

impl IntoObjectId for &ObjectId {
    fn into_object_id(self) -> DocumentStoreResult<ObjectId> {
        Ok(*self)
    }
}

impl IntoObjectId for &str {
    fn into_object_id(self) -> DocumentStoreResult<ObjectId> {
        parse(self)
    }
}

impl IntoObjectId for String {
    fn into_object_id(self) -> DocumentStoreResult<ObjectId> {
        parse(&self)
    }
}

impl IntoObjectId for &String {
    fn into_object_id(self) -> DocumentStoreResult<ObjectId> {
        parse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let id = ObjectId::new();
        assert_eq!(parse(&id.to_hex()).unwrap(), id);
        assert_eq!(id.to_hex().into_object_id().unwrap(), id);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            parse("not-an-id"),
            Err(DocumentStoreError::InvalidIdentifier(s)) if s == "not-an-id"
        ));
    }

    #[test]
    fn exposes_creation_time() {
        let before = Utc::now().timestamp();
        let id = ObjectId::new();
        assert!((created_at(&id).timestamp() - before).abs() <= 1);
    }
}
