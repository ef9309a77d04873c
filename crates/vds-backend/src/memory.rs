//! In-memory driver for tests and embedding.
//!
//! [`InMemoryBackend`] plays the role of a database *server*: its data
//! outlives individual connections, so a store can disconnect and reconnect
//! and still see what it wrote. It also carries fault-injection switches and
//! counters that the store's concurrency tests rely on.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use vds_types::{Document, ID_FIELD};

use crate::error::{BackendError, BackendResult};
use crate::filter::{Filter, IdMatch};
use crate::traits::{Collection, ConnectOptions, Connection, Connector, UpdateOutcome};

/// Documents of one collection, ordered by `_id`.
pub(crate) type CollectionData = BTreeMap<String, Document>;

fn poisoned<T>(_: PoisonError<T>) -> BackendError {
    BackendError::Driver("lock poisoned".into())
}

// ---------------------------------------------------------------------------
// Collection engine shared with the file driver
// ---------------------------------------------------------------------------

fn document_id(document: &Document) -> BackendResult<String> {
    match document.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(id.clone()),
        _ => Err(BackendError::InvalidDocument(format!(
            "{ID_FIELD} must be a string"
        ))),
    }
}

fn matching_keys(data: &CollectionData, filter: &Filter, limit: Option<usize>) -> Vec<String> {
    let limit = limit.unwrap_or(usize::MAX);
    let candidates: Box<dyn Iterator<Item = (&String, &Document)> + '_> = match filter.id_match() {
        IdMatch::Any => Box::new(data.iter()),
        IdMatch::Exact(id) => Box::new(data.get_key_value(id.as_str()).into_iter()),
        IdMatch::Prefix(prefix) => Box::new(
            data.range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
                .take_while(move |(k, _)| k.starts_with(prefix.as_str())),
        ),
    };
    candidates
        .filter(|(_, d)| filter.matches(d))
        .take(limit)
        .map(|(k, _)| k.clone())
        .collect()
}

pub(crate) fn select(data: &CollectionData, filter: &Filter, limit: Option<usize>) -> Vec<Document> {
    matching_keys(data, filter, limit)
        .iter()
        .filter_map(|k| data.get(k).cloned())
        .collect()
}

pub(crate) fn insert(
    data: &mut CollectionData,
    collection: &str,
    document: Document,
) -> BackendResult<()> {
    let id = document_id(&document)?;
    if data.contains_key(&id) {
        return Err(BackendError::DuplicateKey {
            collection: collection.to_string(),
            id,
        });
    }
    data.insert(id, document);
    Ok(())
}

pub(crate) fn update(
    data: &mut CollectionData,
    filter: &Filter,
    set: Document,
) -> BackendResult<UpdateOutcome> {
    if set.contains_key(ID_FIELD) {
        return Err(BackendError::InvalidDocument(format!(
            "{ID_FIELD} cannot be modified"
        )));
    }
    let Some(key) = matching_keys(data, filter, Some(1)).pop() else {
        return Ok(UpdateOutcome::default());
    };
    let Some(document) = data.get_mut(&key) else {
        return Ok(UpdateOutcome::default());
    };
    let mut modified = false;
    for (field, value) in set {
        if document.get(&field) != Some(&value) {
            document.insert(field, value);
            modified = true;
        }
    }
    Ok(UpdateOutcome {
        matched: 1,
        modified: u64::from(modified),
    })
}

pub(crate) fn delete(data: &mut CollectionData, filter: &Filter) -> u64 {
    match matching_keys(data, filter, Some(1)).pop() {
        Some(key) => u64::from(data.remove(&key).is_some()),
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Faults {
    refuse_connect: Option<String>,
    unreachable: bool,
    fsync_failures: HashMap<usize, String>,
    collection_failures: HashMap<String, String>,
    open_delay: Duration,
}

// ---------------------------------------------------------------------------
// InMemoryBackend
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ServerState {
    collections: RwLock<HashMap<String, CollectionData>>,
    faults: Mutex<Faults>,
    physical_connections: usize,
    connects: AtomicUsize,
    collection_opens: AtomicUsize,
    fsyncs: AtomicUsize,
}

/// An in-memory document store.
///
/// Cloning yields another handle to the same data.
#[derive(Clone, Debug)]
pub struct InMemoryBackend {
    state: Arc<ServerState>,
}

impl InMemoryBackend {
    /// Create an empty backend with a single physical connection.
    pub fn new() -> Self {
        Self::with_physical_connections(1)
    }

    /// Create an empty backend whose connections report `count` physical
    /// connections (clamped to at least 1) for fsync fan-out.
    pub fn with_physical_connections(count: usize) -> Self {
        Self {
            state: Arc::new(ServerState {
                collections: RwLock::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                physical_connections: count.max(1),
                connects: AtomicUsize::new(0),
                collection_opens: AtomicUsize::new(0),
                fsyncs: AtomicUsize::new(0),
            }),
        }
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.state
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent `connect` calls fail with `message` (or succeed again with `None`).
    pub fn refuse_connections(&self, message: Option<&str>) {
        self.faults().refuse_connect = message.map(str::to_string);
    }

    /// Make `ping` fail while `unreachable` is set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults().unreachable = unreachable;
    }

    /// Make `fsync` on physical connection `index` fail with `message`.
    pub fn fail_fsync(&self, index: usize, message: &str) {
        self.faults()
            .fsync_failures
            .insert(index, message.to_string());
    }

    pub fn clear_fsync_failures(&self) {
        self.faults().fsync_failures.clear();
    }

    /// Make obtaining a handle to `collection` fail with `message`.
    pub fn fail_collection_open(&self, collection: &str, message: &str) {
        self.faults()
            .collection_failures
            .insert(collection.to_string(), message.to_string());
    }

    pub fn clear_collection_failures(&self) {
        self.faults().collection_failures.clear();
    }

    /// Delay every collection handle request by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        self.faults().open_delay = delay;
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of collection handle requests so far, successful or not.
    pub fn collection_opens(&self) -> usize {
        self.state.collection_opens.load(Ordering::SeqCst)
    }

    /// Number of fsync requests served so far.
    pub fn fsync_count(&self) -> usize {
        self.state.fsyncs.load(Ordering::SeqCst)
    }

    /// Number of documents in `collection` (0 if it does not exist).
    pub fn document_count(&self, collection: &str) -> usize {
        self.state
            .collections
            .read()
            .map(|map| map.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Returns `true` if `collection` exists.
    pub fn has_collection(&self, collection: &str) -> bool {
        self.state
            .collections
            .read()
            .map(|map| map.contains_key(collection))
            .unwrap_or(false)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryBackend {
    async fn connect(&self, options: &ConnectOptions) -> BackendResult<Arc<dyn Connection>> {
        if let Some(message) = self.faults().refuse_connect.clone() {
            return Err(BackendError::Unreachable(message));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        debug!(database = %options.database, "in-memory connection opened");
        Ok(Arc::new(MemoryConnection {
            backend: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct MemoryConnection {
    backend: InMemoryBackend,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn ping(&self) -> BackendResult<()> {
        self.ensure_open()?;
        if self.backend.faults().unreachable {
            return Err(BackendError::Unreachable("ping failed".into()));
        }
        Ok(())
    }

    async fn collection_names(&self) -> BackendResult<Vec<String>> {
        self.ensure_open()?;
        let map = self.backend.state.collections.read().map_err(poisoned)?;
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn collection(&self, name: &str) -> BackendResult<Arc<dyn Collection>> {
        self.ensure_open()?;
        self.backend
            .state
            .collection_opens
            .fetch_add(1, Ordering::SeqCst);
        let (delay, failure) = {
            let faults = self.backend.faults();
            (faults.open_delay, faults.collection_failures.get(name).cloned())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(BackendError::Injected(message));
        }
        Ok(Arc::new(MemoryCollection {
            name: name.to_string(),
            backend: self.backend.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn drop_collection(&self, name: &str) -> BackendResult<bool> {
        self.ensure_open()?;
        let mut map = self.backend.state.collections.write().map_err(poisoned)?;
        Ok(map.remove(name).is_some())
    }

    fn physical_connections(&self) -> usize {
        self.backend.state.physical_connections
    }

    async fn fsync(&self, index: usize) -> BackendResult<()> {
        self.ensure_open()?;
        if index >= self.physical_connections() {
            return Err(BackendError::Driver(format!(
                "no physical connection {index}"
            )));
        }
        self.backend.state.fsyncs.fetch_add(1, Ordering::SeqCst);
        let failure = self.backend.faults().fsync_failures.get(&index).cloned();
        match failure {
            Some(message) => Err(BackendError::Injected(message)),
            None => Ok(()),
        }
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

struct MemoryCollection {
    name: String,
    backend: InMemoryBackend,
    closed: Arc<AtomicBool>,
}

impl MemoryCollection {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Filter, limit: Option<usize>) -> BackendResult<Vec<Document>> {
        self.ensure_open()?;
        let map = self.backend.state.collections.read().map_err(poisoned)?;
        Ok(map
            .get(&self.name)
            .map(|data| select(data, filter, limit))
            .unwrap_or_default())
    }

    async fn insert_one(&self, document: Document) -> BackendResult<()> {
        self.ensure_open()?;
        let mut map = self.backend.state.collections.write().map_err(poisoned)?;
        let data = map.entry(self.name.clone()).or_default();
        insert(data, &self.name, document)
    }

    async fn update_one(&self, filter: &Filter, set: Document) -> BackendResult<UpdateOutcome> {
        self.ensure_open()?;
        let mut map = self.backend.state.collections.write().map_err(poisoned)?;
        match map.get_mut(&self.name) {
            Some(data) => update(data, filter, set),
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn delete_one(&self, filter: &Filter) -> BackendResult<u64> {
        self.ensure_open()?;
        let mut map = self.backend.state.collections.write().map_err(poisoned)?;
        Ok(map
            .get_mut(&self.name)
            .map(|data| delete(data, filter))
            .unwrap_or(0))
    }
}
