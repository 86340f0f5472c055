//! MongoDB driver for docmodel.
//!
//! This crate implements the `StoreBackend`, `BlobStore` and `Connector`
//! traits on top of the official async MongoDB driver. Filters, sorts and
//! update documents are already in MongoDB's own dialect, so they are passed
//! through unchanged; stored documents have their keys escaped so that map
//! fields may use `.` and `$` in their keys.
//!
//! To use this driver, enable the `mongodb` feature of `docmodel`:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data lives in MongoDB Atlas or self-hosted MongoDB
//! - **Atomic updates** - `find_and_modify` maps onto `findOneAndUpdate`,
//!   `findOneAndReplace` and `findOneAndDelete`
//! - **Indexing** - index declarations become MongoDB indexes
//! - **Blob storage** - file fields are stored in GridFS
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     docmodel_mongodb::install();
//!     set_default_endpoint(Endpoint::parse("mongodb://localhost:27017/app")?);
//!
//!     let votes = Vote::find(doc! { "voter": "Tom" }).fetch().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_mongodb;

pub mod store;
mod sanitizer;

use std::sync::Arc;

pub use store::{MongoBlobStore, MongoConnector, MongoStore};

/// Installs [`MongoConnector`] as the connection pool's connector.
pub fn install() {
    docmodel_core::pool::install_connector(Arc::new(MongoConnector));
}
