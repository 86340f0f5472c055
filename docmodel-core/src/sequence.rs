//! Named sequence counters.
//!
//! Each counter is one `{name, value}` document in the `sequences`
//! collection, only ever changed by an atomic upserting increment, so
//! concurrent callers always receive distinct, increasing values.

use bson::{Bson, doc};

use crate::{
    backend::{Namespace, StoreBackend},
    config::Endpoint,
    error::{DocumentStoreError, DocumentStoreResult},
    pool,
    query::FindAndModify,
};

/// Collection holding the counter documents.
pub const SEQUENCE_COLLECTION: &str = "sequences";

/// Increments the counter `name` in `database` and returns the new value.
/// A missing counter starts at zero, so its first value is 1.
pub async fn next_value(backend: &dyn StoreBackend, database: &str, name: &str) -> DocumentStoreResult<i64> {
    let ns = Namespace::new(database, SEQUENCE_COLLECTION);
    let request = FindAndModify::updating(doc! { "name": name }, doc! { "$inc": { "value": 1_i64 } })
        .upsert(true)
        .return_new(true);

    let counter = backend
        .find_and_modify(&ns, request)
        .await?
        .ok_or_else(|| DocumentStoreError::InvariantViolation(format!("upsert of counter {name} returned nothing")))?;

    let value = match counter.get("value") {
        Some(Bson::Int64(value)) => *value,
        Some(Bson::Int32(value)) => i64::from(*value),
        Some(Bson::Double(value)) => *value as i64,
        other => {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "counter {name} holds {other:?} instead of an integer"
            )));
        }
    };

    tracing::debug!(%ns, counter = name, value, "sequence advanced");
    Ok(value)
}

/// [`next_value`] on the pooled driver of `endpoint`.
pub async fn next_value_at(endpoint: &Endpoint, name: &str) -> DocumentStoreResult<i64> {
    let backend = pool::connect(endpoint).await?;
    next_value(backend.as_ref(), &endpoint.database, name).await
}
