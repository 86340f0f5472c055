//! Store endpoint configuration.
//!
//! The process default endpoint is read lazily from the
//! `DOCMODEL_DATABASE_URL` environment variable and falls back to
//! `localhost:27017/modeltest`. Models may override it individually through
//! [`Model::endpoint`](crate::model::Model::endpoint).

use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Environment variable holding the default connection string.
pub const DATABASE_URL_ENV: &str = "DOCMODEL_DATABASE_URL";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_DATABASE: &str = "modeltest";

/// A store endpoint: the server to talk to and the database to use on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Full connection string, handed to drivers that want credentials or
    /// options beyond host and port.
    pub uri: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        let host = host.into();
        let database = database.into();
        let uri = format!("mongodb://{host}:{port}/{database}");
        Endpoint { host, port, database, uri }
    }

    /// Parses `mongodb://[user:pass@]host[:port][/database][?options]`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Initialization`] when the scheme is
    /// missing, the host is empty or the port is not a number.
    pub fn parse(uri: &str) -> DocumentStoreResult<Self> {
        let invalid = |reason: &str| DocumentStoreError::Initialization(format!("invalid endpoint {uri:?}: {reason}"));

        let rest = uri
            .strip_prefix("mongodb://")
            .ok_or_else(|| invalid("expected a mongodb:// scheme"))?;
        let rest = rest.split_once('?').map_or(rest, |(head, _)| head);
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let hosts = authority.rsplit_once('@').map_or(authority, |(_, hosts)| hosts);
        // only the first host of a seed list identifies the pool entry
        let host = hosts.split(',').next().unwrap_or_default();

        let (host, port) = match host.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid("port is not a number"))?),
            None => (host, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let database = if path.is_empty() { DEFAULT_DATABASE } else { path };

        Ok(Endpoint {
            host: host.to_string(),
            port,
            database: database.to_string(),
            uri: uri.to_string(),
        })
    }

    /// The same server with another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Endpoint {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Key under which connections to this endpoint are pooled.
    pub fn server(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::new(DEFAULT_HOST, DEFAULT_PORT, DEFAULT_DATABASE)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

static DEFAULT_ENDPOINT: RwLock<Option<Endpoint>> = RwLock::new(None);

fn from_environment() -> Endpoint {
    match std::env::var(DATABASE_URL_ENV) {
        Ok(uri) => match Endpoint::parse(&uri) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring {DATABASE_URL_ENV}");
                Endpoint::default()
            }
        },
        Err(_) => Endpoint::default(),
    }
}

/// The endpoint used by models that do not override it.
pub fn default_endpoint() -> Endpoint {
    if let Some(endpoint) = DEFAULT_ENDPOINT.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        return endpoint.clone();
    }

    DEFAULT_ENDPOINT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .get_or_insert_with(from_environment)
        .clone()
}

/// Replaces the process default endpoint.
pub fn set_default_endpoint(endpoint: Endpoint) {
    tracing::debug!(%endpoint, "default endpoint set");
    *DEFAULT_ENDPOINT.write().unwrap_or_else(PoisonError::into_inner) = Some(endpoint);
}

/// Forgets the configured default so the next read consults the environment again.
pub fn reset() {
    *DEFAULT_ENDPOINT.write().unwrap_or_else(PoisonError::into_inner) = None;
}
