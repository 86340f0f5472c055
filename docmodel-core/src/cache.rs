//! Process-wide identity cache.
//!
//! Maps `(model type, identifier)` to the most recently loaded or created
//! instance. Reads hand out clones, so a cached instance is never mutated in
//! place; mutations evict the entry instead.

use bson::oid::ObjectId;
use dashmap::DashMap;
use std::{
    any::{Any, TypeId},
    sync::{Arc, LazyLock},
};

type Entry = Arc<dyn Any + Send + Sync>;

static CACHE: LazyLock<DashMap<(TypeId, ObjectId), Entry>> = LazyLock::new(DashMap::new);

/// Returns a clone of the cached instance of `M` with identifier `id`.
pub fn get<M: Any + Clone + Send + Sync>(id: &ObjectId) -> Option<M> {
    CACHE
        .get(&(TypeId::of::<M>(), *id))
        .and_then(|entry| entry.value().downcast_ref::<M>().cloned())
}

/// Caches `instance` under `id`, replacing any previous entry.
pub fn insert<M: Any + Clone + Send + Sync>(id: ObjectId, instance: &M) {
    CACHE.insert((TypeId::of::<M>(), id), Arc::new(instance.clone()));
}

/// Evicts the entry for `id`. Returns whether one existed.
pub fn evict<M: Any>(id: &ObjectId) -> bool {
    let evicted = CACHE.remove(&(TypeId::of::<M>(), *id)).is_some();
    if evicted {
        tracing::debug!(model = std::any::type_name::<M>(), %id, "cache entry evicted");
    }
    evicted
}

/// Evicts every entry of `M`.
pub fn clear<M: Any>() {
    let type_id = TypeId::of::<M>();
    CACHE.retain(|(entry_type, _), _| *entry_type != type_id);
    tracing::debug!(model = std::any::type_name::<M>(), "cache cleared");
}

/// Number of cached instances of `M`.
pub fn len<M: Any>() -> usize {
    let type_id = TypeId::of::<M>();
    CACHE.iter().filter(|entry| entry.key().0 == type_id).count()
}

/// Evicts everything.
pub fn reset() {
    CACHE.clear();
}
