//! Error types and result types for the mapping core.
//!
//! Every fallible operation returns [`DocumentStoreResult<T>`]. Driver and
//! transport failures are wrapped at the driver boundary and propagate
//! unchanged; nothing in this crate retries them.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the mapping core and its drivers.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during driver initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The document has an invalid structure for the requested operation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage driver.
    #[error("Backend error: {0}")]
    Backend(String),
    /// A string could not be parsed as an object identifier.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    /// A field was assigned a value that cannot be coerced to its declared type.
    #[error("Cannot coerce {found} into {expected} for field {field}")]
    TypeCoercion {
        field: String,
        expected: &'static str,
        found: String,
    },
    /// A filter or update document uses an operator the driver does not understand.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A field name that is not declared on the model.
    #[error("Model {model} has no field {field}")]
    UnknownField { model: String, field: String },
    /// A signal handler aborted the lifecycle operation that fired it.
    #[error("Signal handler failed: {0}")]
    Signal(String),
    /// An internal invariant did not hold. Not recoverable.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl DocumentStoreError {
    pub(crate) fn coercion(field: &str, expected: &'static str, found: &bson::Bson) -> Self {
        DocumentStoreError::TypeCoercion {
            field: field.to_string(),
            expected,
            found: format!("{:?}", found.element_type()),
        }
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
