//! The mapping core of the docmodel object-document mapper.
//!
//! This crate provides:
//!
//! - **Field protocol** ([`field`]) - typed field descriptors, coercion and defaults
//! - **Schema registration** ([`schema`]) - the per-type field table
//! - **Models** ([`model`]) - CRUD, the save/erase/recycle lifecycle and atomic updates
//! - **Query cursors** ([`cursor`]) - lazy, immutable, chainable queries
//! - **Identity cache** ([`cache`]) and **signal bus** ([`signal`])
//! - **Sequence counters** ([`sequence`]) - atomic auto-increment values
//! - **Driver abstraction** ([`backend`]) and **query documents** ([`query`])
//! - **Configuration** ([`config`]) and **connection pooling** ([`pool`])
//! - **Error handling** ([`error`]) and **pagination** ([`page`])
//!
//! Process-wide state (identity cache, signal handlers, connection pool and
//! default endpoint) is created lazily and cleared with [`reset`].

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod cache;
pub mod config;
pub mod cursor;
pub mod error;
pub mod field;
pub mod id;
pub mod model;
pub mod page;
pub mod pool;
pub mod query;
pub mod schema;
pub mod sequence;
pub mod signal;

/// Clears the identity cache, every signal handler, the connection pool and
/// the configured default endpoint.
pub fn reset() {
    cache::reset();
    signal::signals().clear();
    pool::reset();
    config::reset();
    tracing::debug!("process state reset");
}
