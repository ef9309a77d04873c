use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vds_types::Document;

use crate::error::BackendResult;
use crate::filter::Filter;

/// Where and what to connect to. Drivers ignore fields they have no use for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Logical database holding the project collections.
    pub database: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 27017,
            database: "vds".into(),
        }
    }
}

/// Establishes connections to a document store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    ///
    /// On failure the driver must release whatever it had set up; nothing
    /// half-open may leak to the caller.
    async fn connect(&self, options: &ConnectOptions) -> BackendResult<Arc<dyn Connection>>;
}

/// A live connection to one logical database.
///
/// A single `Connection` may multiplex several physical sockets (a pool, a
/// replica set). [`Connection::fsync`] addresses them individually so that
/// durability can be requested on every one.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> BackendResult<()>;

    /// Names of all existing collections.
    async fn collection_names(&self) -> BackendResult<Vec<String>>;

    /// Obtain a handle to a collection. The collection need not exist yet.
    async fn collection(&self, name: &str) -> BackendResult<Arc<dyn Collection>>;

    /// Drop a collection and all its documents.
    ///
    /// Returns `Ok(false)` if no such collection existed.
    async fn drop_collection(&self, name: &str) -> BackendResult<bool>;

    /// Number of physical connections behind this handle (at least 1).
    fn physical_connections(&self) -> usize;

    /// Force durable storage of everything written through physical
    /// connection `index` (`0..physical_connections()`).
    async fn fsync(&self, index: usize) -> BackendResult<()>;

    /// Close the connection. Handles derived from it stop working.
    async fn close(&self) -> BackendResult<()>;
}

/// Result of a conditional update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents that satisfied the filter (0 or 1).
    pub matched: u64,
    /// Documents whose content actually changed.
    pub modified: u64,
}

/// A named collection of documents keyed by `_id`.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// Return documents matching `filter` in `_id` order, at most `limit`.
    async fn find(&self, filter: &Filter, limit: Option<usize>) -> BackendResult<Vec<Document>>;

    /// Return the first document matching `filter`.
    async fn find_one(&self, filter: &Filter) -> BackendResult<Option<Document>> {
        Ok(self.find(filter, Some(1)).await?.into_iter().next())
    }

    /// Insert a document. Fails with `DuplicateKey` if its `_id` exists.
    async fn insert_one(&self, document: Document) -> BackendResult<()>;

    /// Set the given fields on the first document matching `filter`.
    async fn update_one(&self, filter: &Filter, set: Document) -> BackendResult<UpdateOutcome>;

    /// Remove the first document matching `filter`; returns how many were removed.
    async fn delete_one(&self, filter: &Filter) -> BackendResult<u64>;
}
