//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Schema` derive, and the `Model`/`ModelExt` traits
//! - Field member types: references, file blobs
//! - Cursors, conditions and atomic-update requests
//! - Signals, configuration and error types
//! - The BSON and chrono types models are written with

pub use async_trait::async_trait;
pub use bson::{Bson, Document, doc, oid::ObjectId};
pub use chrono::{DateTime, Utc};
pub use docmodel_core::{
    config::{Endpoint, set_default_endpoint},
    cursor::Cursor,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{FileBlob, Reference, Resolved},
    model::{Identity, Model, ModelExt},
    page::Page,
    query::{Conditions, FindAndModify, IndexSpec, Sort, SortDirection},
    schema::Schema,
    signal::{Sender, Signal, SignalEvent, signals},
};
pub use docmodel_macros::Schema;
