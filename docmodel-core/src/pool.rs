//! Process-wide connection pool.
//!
//! At most one live driver exists per `(host, port)`; every database on that
//! server is reached through it. Drivers come from the installed
//! [`Connector`] or are attached directly, and [`reset`] drops them all.

use dashmap::DashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::{
    backend::{Connector, StoreBackend},
    config::Endpoint,
    error::{DocumentStoreError, DocumentStoreResult},
};

static CONNECTIONS: LazyLock<DashMap<(String, u16), Arc<dyn StoreBackend>>> = LazyLock::new(DashMap::new);
static CONNECTOR: RwLock<Option<Arc<dyn Connector>>> = RwLock::new(None);

/// Installs the factory used for endpoints that have no pooled driver yet.
pub fn install_connector(connector: Arc<dyn Connector>) {
    *CONNECTOR.write().unwrap_or_else(PoisonError::into_inner) = Some(connector);
}

/// Pools `backend` for the server of `endpoint`, replacing any previous driver.
pub fn attach(endpoint: &Endpoint, backend: Arc<dyn StoreBackend>) {
    tracing::debug!(host = %endpoint.host, port = endpoint.port, "driver attached");
    CONNECTIONS.insert(endpoint.server(), backend);
}

/// Returns the pooled driver for `endpoint`, connecting on first use.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Initialization`] when no driver is pooled and
/// no connector is installed, or whatever the connector fails with.
pub async fn connect(endpoint: &Endpoint) -> DocumentStoreResult<Arc<dyn StoreBackend>> {
    let server = endpoint.server();
    if let Some(backend) = CONNECTIONS.get(&server) {
        return Ok(backend.value().clone());
    }

    let connector = CONNECTOR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(|| DocumentStoreError::Initialization(format!("no connector installed for {endpoint}")))?;

    tracing::debug!(host = %endpoint.host, port = endpoint.port, "connecting");
    let backend = connector.connect(endpoint).await?;

    let pooled = CONNECTIONS.entry(server).or_insert_with(|| backend.clone()).value().clone();
    if !Arc::ptr_eq(&pooled, &backend) {
        tracing::warn!(host = %endpoint.host, port = endpoint.port, "lost connection race, using pooled driver");
        backend.shutdown().await?;
    }
    Ok(pooled)
}

/// Number of pooled drivers.
pub fn len() -> usize {
    CONNECTIONS.len()
}

/// Drops every pooled driver and the installed connector.
pub fn reset() {
    CONNECTIONS.clear();
    *CONNECTOR.write().unwrap_or_else(PoisonError::into_inner) = None;
}
