//! Connection lifecycle, the project registry, status polling, and fsync.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vds_backend::{BackendError, Connection, Connector};
use vds_types::{DatabaseStatus, ProjectName};

use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::hasher::{Blake3ObjectHasher, ObjectHasher};
use crate::project::{Project, ProjectHandle, ProjectSettings};
use crate::registry::{Acquire, Registry};

/// One open connection and the projects opened through it.
///
/// Every project in `registry` holds collections of `connection`, so the
/// two are installed and retired together.
#[derive(Clone)]
struct Session {
    connection: Arc<dyn Connection>,
    registry: Arc<Registry>,
}

/// A connection to one logical database of projects.
///
/// `Database` is cheap to share behind an `Arc`; every method takes `&self`.
pub struct Database {
    connector: Arc<dyn Connector>,
    config: DatabaseConfig,
    session: RwLock<Option<Session>>,
    settings: ProjectSettings,
}

impl Database {
    /// Create a closed database that will connect through `connector`.
    pub fn new(connector: impl Connector + 'static, config: DatabaseConfig) -> Self {
        let hasher: Option<Arc<dyn ObjectHasher>> = if config.verify_hashes {
            Some(Arc::new(Blake3ObjectHasher))
        } else {
            None
        };
        let settings = ProjectSettings {
            hasher,
            branch_poll_timeout: config.branch_poll_timeout(),
        };
        Self {
            connector: Arc::new(connector),
            config,
            session: RwLock::new(None),
            settings,
        }
    }

    /// Verify every inserted object with `hasher`, whatever the config says.
    pub fn with_hasher(mut self, hasher: Arc<dyn ObjectHasher>) -> Self {
        self.settings.hasher = Some(hasher);
        self
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn session(&self) -> StorageResult<Session> {
        self.current().ok_or(StorageError::NotOpen)
    }

    fn connection(&self) -> StorageResult<Arc<dyn Connection>> {
        Ok(self.session()?.connection)
    }

    // ---- Lifecycle ----

    /// Connect to the backend.
    pub async fn open_database(&self) -> StorageResult<()> {
        if self.is_open() {
            return Err(StorageError::AlreadyOpen);
        }
        let options = self.config.connect_options();
        let connection = self.connector.connect(&options).await?;

        let installed = {
            let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                false
            } else {
                *slot = Some(Session {
                    connection: Arc::clone(&connection),
                    registry: Arc::new(Registry::default()),
                });
                true
            }
        };
        if !installed {
            // Another open won the race; ours is surplus.
            if let Err(e) = connection.close().await {
                warn!(error = %e, "closing surplus connection failed");
            }
            return Err(StorageError::AlreadyOpen);
        }

        info!(
            host = %options.host,
            port = options.port,
            database = %options.database,
            "database opened"
        );
        Ok(())
    }

    /// Flush and disconnect. Closing a closed database does nothing.
    ///
    /// Fsync failures are logged rather than returned: the connection is
    /// going away regardless.
    ///
    /// Projects opened on this connection are retired with it. Handles that
    /// are still held keep working until the backend rejects them as closed,
    /// and dropping them later has no effect on projects opened after a
    /// reopen, which always get a fresh collection.
    pub async fn close_database(&self) -> StorageResult<()> {
        let taken = self.session.write().unwrap_or_else(PoisonError::into_inner).take();
        let Some(Session { connection, registry }) = taken else {
            debug!("close of a closed database");
            return Ok(());
        };
        let retired = registry.len();
        if retired > 0 {
            debug!(projects = retired, "retiring projects of the closed connection");
        }

        if let Err(e) = fsync_all(&connection).await {
            warn!(error = %e, "fsync before close failed");
        }
        if let Err(e) = connection.close().await {
            warn!(error = %e, "disconnect failed");
        }
        info!(database = %self.config.database, "database closed");
        Ok(())
    }

    /// Ask every physical connection to make its writes durable.
    pub async fn fsync_database(&self) -> StorageResult<()> {
        let connection = self.connection()?;
        fsync_all(&connection).await
    }

    /// Observe the connection state.
    ///
    /// When the observed state equals `previous` the answer is held back for
    /// the configured status timeout and then re-observed, so a caller can
    /// poll in a loop without spinning. The re-observation pings again, so a
    /// slow ping makes the delay exceed the status timeout by its latency.
    pub async fn get_database_status(
        &self,
        previous: Option<DatabaseStatus>,
    ) -> DatabaseStatus {
        let status = self.observe_status().await;
        if Some(status) != previous {
            return status;
        }
        tokio::time::sleep(self.config.status_timeout()).await;
        self.observe_status().await
    }

    async fn observe_status(&self) -> DatabaseStatus {
        let Some(Session { connection, .. }) = self.current() else {
            return DatabaseStatus::Closed;
        };
        match connection.ping().await {
            Ok(()) => DatabaseStatus::Connected,
            Err(e) => {
                debug!(error = %e, "ping failed");
                DatabaseStatus::Unreachable
            }
        }
    }

    // ---- Projects ----

    /// Names of all existing projects, sorted.
    pub async fn get_project_names(&self) -> StorageResult<Vec<ProjectName>> {
        let connection = self.connection()?;
        let mut names: Vec<ProjectName> = connection
            .collection_names()
            .await?
            .iter()
            .filter_map(|name| ProjectName::parse(name).ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Open `name`, sharing the project with every other open handle.
    ///
    /// Concurrent opens of a project that is not yet open are coalesced into
    /// a single backend open; all of them receive its outcome.
    pub async fn open_project(&self, name: &str) -> StorageResult<ProjectHandle> {
        let name = ProjectName::parse(name)?;
        let Session { connection, registry } = self.session()?;

        let reply = match registry.acquire(&name) {
            Acquire::Ready(handle) => return Ok(handle),
            Acquire::Joined(reply) => reply,
            Acquire::Start(reply) => {
                // Detached so that a cancelled caller cannot strand the
                // `Opening` entry.
                let settings = self.settings.clone();
                tokio::spawn(async move {
                    let outcome = connection
                        .collection(name.as_str())
                        .await
                        .map(|collection| Arc::new(Project::new(name.clone(), collection, settings)))
                        .map_err(StorageError::from);
                    registry.resolve(&name, outcome);
                });
                reply
            }
        };

        reply.await.map_err(|_| {
            StorageError::Backend(BackendError::Driver("project open was abandoned".into()))
        })?
    }

    /// Drop the collection behind `name`.
    ///
    /// Refused with [`StorageError::ProjectInUse`] while any handle to the
    /// project exists or an open is in flight.
    pub async fn delete_project(&self, name: &str) -> StorageResult<()> {
        let name = ProjectName::parse(name)?;
        let Session { connection, registry } = self.session()?;
        if registry.is_registered(&name) {
            return Err(StorageError::ProjectInUse { name });
        }
        if !connection.drop_collection(name.as_str()).await? {
            return Err(StorageError::not_found(format!("project {name}")));
        }
        info!(project = %name, "project deleted");
        Ok(())
    }

    /// Number of live handles to `name` on the current connection, or
    /// `None` if it is not open there.
    pub fn project_refcount(&self, name: &str) -> Option<usize> {
        let name = ProjectName::parse(name).ok()?;
        self.current()?.registry.refcount(&name)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Fsync every physical connection concurrently.
///
/// All requests run to completion; the first failure to complete is
/// reported along with how many failed.
async fn fsync_all(connection: &Arc<dyn Connection>) -> StorageResult<()> {
    let total = connection.physical_connections();
    let mut tasks = JoinSet::new();
    for index in 0..total {
        let connection = Arc::clone(connection);
        tasks.spawn(async move { (index, connection.fsync(index).await) });
    }

    let mut failed = 0;
    let mut first = None;
    while let Some(joined) = tasks.join_next().await {
        let error = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((index, Err(e))) => {
                warn!(connection = index, error = %e, "fsync failed");
                e
            }
            Err(e) => {
                warn!(error = %e, "fsync task failed");
                BackendError::Driver(e.to_string())
            }
        };
        failed += 1;
        first.get_or_insert(error);
    }

    match first {
        None => {
            debug!(connections = total, "fsync complete");
            Ok(())
        }
        Some(first) => Err(StorageError::Consistency {
            failed,
            total,
            first,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;
    use vds_backend::InMemoryBackend;
    use vds_types::{Document, ObjectHash};

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            status_timeout_ms: 2000,
            branch_poll_timeout_ms: 100,
            ..DatabaseConfig::default()
        }
    }

    async fn open(backend: &InMemoryBackend) -> Arc<Database> {
        let db = Database::new(backend.clone(), config());
        db.open_database().await.unwrap();
        Arc::new(db)
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn open_and_close_lifecycle() {
        let backend = InMemoryBackend::new();
        let db = Database::new(backend.clone(), config());
        assert!(!db.is_open());
        assert!(matches!(db.get_project_names().await, Err(StorageError::NotOpen)));
        assert!(matches!(db.fsync_database().await, Err(StorageError::NotOpen)));

        db.open_database().await.unwrap();
        assert!(db.is_open());
        assert!(matches!(db.open_database().await, Err(StorageError::AlreadyOpen)));
        assert_eq!(backend.connect_count(), 1);

        db.close_database().await.unwrap();
        assert!(!db.is_open());
        db.close_database().await.unwrap();

        db.open_database().await.unwrap();
        assert_eq!(backend.connect_count(), 2);
    }

    #[tokio::test]
    async fn refused_connection_leaves_database_closed() {
        let backend = InMemoryBackend::new();
        backend.refuse_connections(Some("no route"));
        let db = Database::new(backend.clone(), config());
        let err = db.open_database().await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(BackendError::Unreachable(_))));
        assert!(!db.is_open());

        backend.refuse_connections(None);
        db.open_database().await.unwrap();
    }

    #[tokio::test]
    async fn close_swallows_fsync_failure() {
        let backend = InMemoryBackend::new();
        backend.fail_fsync(0, "disk full");
        let db = open(&backend).await;
        db.close_database().await.unwrap();
        assert!(!db.is_open());
        assert_eq!(backend.fsync_count(), 1);
    }

    #[tokio::test]
    async fn fsync_fans_out_to_every_connection() {
        let backend = InMemoryBackend::with_physical_connections(4);
        let db = open(&backend).await;
        db.fsync_database().await.unwrap();
        assert_eq!(backend.fsync_count(), 4);
    }

    #[tokio::test]
    async fn fsync_failure_on_one_connection_is_a_consistency_error() {
        let backend = InMemoryBackend::with_physical_connections(3);
        backend.fail_fsync(1, "disk full");
        let db = open(&backend).await;

        let err = db.fsync_database().await.unwrap_err();
        match err {
            StorageError::Consistency {
                failed,
                total,
                first,
            } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
                assert_eq!(first, BackendError::Injected("disk full".into()));
            }
            other => panic!("expected consistency error, got {other:?}"),
        }
        assert_eq!(backend.fsync_count(), 3);
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn status_reports_changes_immediately() {
        let backend = InMemoryBackend::new();
        let db = Database::new(backend.clone(), config());

        let start = Instant::now();
        assert_eq!(db.get_database_status(None).await, DatabaseStatus::Closed);
        db.open_database().await.unwrap();
        assert_eq!(
            db.get_database_status(Some(DatabaseStatus::Closed)).await,
            DatabaseStatus::Connected
        );
        backend.set_unreachable(true);
        assert_eq!(
            db.get_database_status(Some(DatabaseStatus::Connected)).await,
            DatabaseStatus::Unreachable
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_status_is_delayed() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;

        let start = Instant::now();
        let status = db.get_database_status(Some(DatabaseStatus::Connected)).await;
        assert_eq!(status, DatabaseStatus::Connected);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_status_reports_the_state_at_delivery() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;

        let poll = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.get_database_status(Some(DatabaseStatus::Connected)).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        backend.set_unreachable(true);
        assert_eq!(poll.await.unwrap(), DatabaseStatus::Unreachable);
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn project_names_are_filtered_and_sorted() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;
        for name in ["zeta", "alpha"] {
            let p = db.open_project(name).await.unwrap();
            p.insert_object(doc(json!({"_id": "#x"}))).await.unwrap();
        }
        let conn = db.connection().unwrap();
        for name in ["system.indexes", "not-a-project"] {
            let coll = conn.collection(name).await.unwrap();
            coll.insert_one(doc(json!({"_id": "k"}))).await.unwrap();
        }

        let names: Vec<String> = db
            .get_project_names()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn invalid_project_names_are_rejected_before_io() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;
        for bad in ["system.users", "a-b", "a.b"] {
            assert!(matches!(db.open_project(bad).await, Err(StorageError::Validation(_))));
            assert!(matches!(db.delete_project(bad).await, Err(StorageError::Validation(_))));
        }
        assert_eq!(backend.collection_opens(), 0);
    }

    #[tokio::test]
    async fn open_project_requires_open_database() {
        let db = Database::new(InMemoryBackend::new(), config());
        assert!(matches!(db.open_project("p").await, Err(StorageError::NotOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_opens_share_one_backend_open() {
        let backend = InMemoryBackend::new();
        backend.set_open_delay(Duration::from_millis(50));
        let db = open(&backend).await;

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            tasks.spawn(async move { db.open_project("p").await });
        }
        let mut handles = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            handles.push(joined.unwrap().unwrap());
        }

        assert_eq!(backend.collection_opens(), 1);
        assert_eq!(db.project_refcount("p"), Some(8));
        for pair in handles.windows(2) {
            assert!(std::ptr::eq::<Project>(&*pair[0], &*pair[1]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_fails_every_waiter_and_can_be_retried() {
        let backend = InMemoryBackend::new();
        backend.set_open_delay(Duration::from_millis(50));
        backend.fail_collection_open("p", "boom");
        let db = open(&backend).await;

        let mut tasks = JoinSet::new();
        for _ in 0..4 {
            let db = Arc::clone(&db);
            tasks.spawn(async move { db.open_project("p").await });
        }
        while let Some(joined) = tasks.join_next().await {
            let err = joined.unwrap().unwrap_err();
            assert!(matches!(err, StorageError::Backend(BackendError::Injected(_))));
        }
        assert_eq!(backend.collection_opens(), 1);
        assert_eq!(db.project_refcount("p"), None);

        backend.clear_collection_failures();
        let handle = db.open_project("p").await.unwrap();
        assert_eq!(db.project_refcount("p"), Some(1));
        assert_eq!(backend.collection_opens(), 2);
        handle.close();
    }

    #[tokio::test]
    async fn closing_handles_releases_the_project() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;

        let a = db.open_project("p").await.unwrap();
        let b = db.open_project("p").await.unwrap();
        assert_eq!(db.project_refcount("p"), Some(2));
        assert_eq!(backend.collection_opens(), 1);

        a.close();
        assert_eq!(db.project_refcount("p"), Some(1));
        drop(b);
        assert_eq!(db.project_refcount("p"), None);

        let _c = db.open_project("p").await.unwrap();
        assert_eq!(db.project_refcount("p"), Some(1));
        assert_eq!(backend.collection_opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_opener_does_not_strand_the_project() {
        let backend = InMemoryBackend::new();
        backend.set_open_delay(Duration::from_millis(50));
        let db = open(&backend).await;

        let first = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.open_project("p").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let handle = db.open_project("p").await.unwrap();
        assert_eq!(db.project_refcount("p"), Some(1));
        assert_eq!(backend.collection_opens(), 1);
        handle.close();
        assert_eq!(db.project_refcount("p"), None);
    }

    #[tokio::test]
    async fn delete_refuses_a_project_in_use() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;

        let handle = db.open_project("p").await.unwrap();
        handle
            .insert_object(doc(json!({"_id": "#h", "v": 1})))
            .await
            .unwrap();

        let err = db.delete_project("p").await.unwrap_err();
        assert!(matches!(err, StorageError::ProjectInUse { .. }));
        assert!(backend.has_collection("p"));
        assert!(handle.load_object("#h").await.is_ok());

        handle.close();
        db.delete_project("p").await.unwrap();
        assert!(!backend.has_collection("p"));
        assert!(matches!(db.delete_project("p").await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_refuses_a_project_still_opening() {
        let backend = InMemoryBackend::new();
        backend.set_open_delay(Duration::from_millis(50));
        let db = open(&backend).await;
        let conn = db.connection().unwrap();
        conn.collection("p")
            .await
            .unwrap()
            .insert_one(doc(json!({"_id": "#h"})))
            .await
            .unwrap();

        let opening = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.open_project("p").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(db.project_refcount("p"), None);

        let err = db.delete_project("p").await.unwrap_err();
        assert!(matches!(err, StorageError::ProjectInUse { .. }));
        assert!(backend.has_collection("p"));

        let handle = opening.await.unwrap().unwrap();
        assert!(handle.load_object("#h").await.is_ok());
        assert_eq!(db.project_refcount("p"), Some(1));
    }

    #[tokio::test]
    async fn reopen_gives_fresh_projects() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;

        let stale = db.open_project("p").await.unwrap();
        db.close_database().await.unwrap();
        assert_eq!(db.project_refcount("p"), None);
        db.open_database().await.unwrap();

        let fresh = db.open_project("p").await.unwrap();
        assert_eq!(backend.collection_opens(), 2);
        assert!(!std::ptr::eq::<Project>(&*stale, &*fresh));
        fresh
            .insert_object(doc(json!({"_id": "#x"})))
            .await
            .unwrap();
        assert!(matches!(
            stale.insert_object(doc(json!({"_id": "#y"}))).await,
            Err(StorageError::Backend(BackendError::Closed))
        ));

        // Releasing the old handle leaves the new project untouched.
        drop(stale);
        assert_eq!(db.project_refcount("p"), Some(1));
        db.delete_project("p").await.unwrap_err();
        fresh.close();
        db.delete_project("p").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_in_flight_during_close_is_not_reused() {
        let backend = InMemoryBackend::new();
        backend.set_open_delay(Duration::from_millis(50));
        let db = open(&backend).await;

        let opening = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.open_project("p").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        db.close_database().await.unwrap();
        db.open_database().await.unwrap();

        let stale = opening.await.unwrap().unwrap();
        let fresh = db.open_project("p").await.unwrap();
        assert_eq!(backend.collection_opens(), 2);
        assert_eq!(db.project_refcount("p"), Some(1));
        assert!(fresh.insert_object(doc(json!({"_id": "#x"}))).await.is_ok());
        assert!(stale.load_object("#x").await.is_err());
    }

    #[tokio::test]
    async fn verify_hashes_config_installs_hasher() {
        let backend = InMemoryBackend::new();
        let db = Database::new(
            backend.clone(),
            DatabaseConfig {
                verify_hashes: true,
                ..config()
            },
        );
        db.open_database().await.unwrap();
        let p = db.open_project("p").await.unwrap();
        let err = p
            .insert_object(doc(json!({"_id": "#forged", "v": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn branches_survive_reopen() {
        let backend = InMemoryBackend::new();
        let db = open(&backend).await;
        let main = vds_types::BranchName::parse("*main").unwrap();
        let root = ObjectHash::parse("#root").unwrap();

        let p = db.open_project("p").await.unwrap();
        p.set_branch_hash(&main, None, Some(&root)).await.unwrap();
        p.close();
        db.close_database().await.unwrap();

        db.open_database().await.unwrap();
        let p = db.open_project("p").await.unwrap();
        assert_eq!(p.read_branch_hash(&main).await.unwrap(), Some(root));
    }
}
