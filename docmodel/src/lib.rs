//! Main docmodel crate: an object-document mapper for JSON document stores.
//!
//! This crate is the primary entry point. It re-exports the mapping core,
//! the `#[derive(Schema)]` macro and the drivers.
//!
//! # Features
//!
//! - **Declarative models** - plain structs with `#[derive(Schema)]`, typed
//!   fields, defaults, references, embedded models and file blobs
//! - **Lifecycle** - create, save, erase, recycle and revive, with signals
//! - **Lazy cursors** - immutable, chainable queries with sorting, slicing
//!   and pagination
//! - **Atomic operations** - find-and-modify, field increments and named
//!   sequence counters
//! - **Identity cache** - repeated `get`s of one document share a snapshot
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Schema)]
//! struct UserTag {
//!     id: Option<ObjectId>,
//!     user: Option<String>,
//!     tag: Option<String>,
//!     #[field(default = 0)]
//!     count: Option<i64>,
//! }
//!
//! #[async_trait]
//! impl Model for UserTag {}
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     docmodel::memory::install();
//!
//!     let tag = UserTag::create(doc! { "user": "Jack", "tag": "Food" }).await?;
//!     UserTag::increment_field(doc! { "_id": tag.id() }, "count", 1).await?;
//!
//!     let hackers = UserTag::find(doc! { "tag": "Hacking" })
//!         .sort("-count")
//!         .limit(10)
//!         .fetch()
//!         .await?;
//!     println!("{hackers:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Connections
//!
//! Models connect to the process-wide default [`Endpoint`](config::Endpoint),
//! read from `DOCMODEL_DATABASE_URL` and falling back to
//! `mongodb://localhost:27017/modeltest`, unless they override
//! [`Model::endpoint`](model::Model::endpoint). Drivers are opened once per
//! server by the installed connector and pooled.
//!
//! # Backends
//!
//! - [`memory`] - in-memory storage for development and testing
//! - [`mongodb`] - MongoDB storage (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docmodel;

pub mod prelude;

pub use docmodel_core::{
    backend, cache, config, cursor, error, field, id, model, page, pool, query, reset, schema,
    sequence, signal,
};
pub use docmodel_macros::Schema;

// Re-exported so that models and generated code need no direct dependency.
pub use async_trait::async_trait;
pub use bson;
pub use chrono;

/// In-memory driver.
pub mod memory {
    pub use docmodel_memory::{InMemoryBlobStore, InMemoryConnector, InMemoryStore, install};
}

/// MongoDB driver.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoBlobStore, MongoConnector, MongoStore, install};
}
