//! In-memory document-store driver for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `StoreBackend` and `BlobStore` traits. It uses async-aware read-write locks
//! for concurrent access and is meant for development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - one async-aware lock per store, so atomic
//!   operations really are atomic
//! - **Mongo-style filters** - `$eq $ne $gt $gte $lt $lte $in $nin $exists
//!   $not` per field, `$and $or $nor` at the top level
//! - **Update operators** - `$set $unset $inc $push $setOnInsert` or full replacement
//! - **Blob storage** - one in-memory blob store per database
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     docmodel_memory::install();
//!
//!     let vote = Vote::create(doc! { "voter": "Tom", "votee": "Jack" }).await?;
//!     assert!(Vote::get(vote.id().unwrap()).await?.is_some());
//!     Ok(())
//! }
//! ```

mod evaluator;
pub mod store;
mod update;

use std::sync::Arc;

pub use store::{InMemoryBlobStore, InMemoryConnector, InMemoryStore};

/// Installs [`InMemoryConnector`] as the connection pool's connector.
pub fn install() {
    docmodel_core::pool::install_connector(Arc::new(InMemoryConnector));
}
