//! File-backed driver: one JSON file per collection.
//!
//! Layout under the backend directory:
//!
//! ```text
//! <dir>/<collection>.json   { "<_id>": { ...document... }, ... }
//! <dir>/-empty.json         the collection with the empty name
//! ```
//!
//! Collections are loaded when a connection is opened. Every mutation is
//! applied to a copy of the collection, written and synced to
//! `<collection>.json.tmp`, and renamed over the live file; only then does
//! the in-memory copy change. `fsync` syncs every collection file and the
//! directory itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vds_types::Document;

use crate::error::{BackendError, BackendResult};
use crate::filter::Filter;
use crate::memory::{self, CollectionData};
use crate::traits::{Collection, ConnectOptions, Connection, Connector, UpdateOutcome};

const EXTENSION: &str = "json";

/// File stem of the collection named `""`. `-` never appears in a valid
/// collection name, so the stem cannot collide with one.
const EMPTY_STEM: &str = "-empty";

/// A document store persisted as JSON files in a directory.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn check_name(name: &str) -> BackendResult<()> {
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if ok && !name.starts_with('.') {
        Ok(())
    } else {
        Err(BackendError::InvalidName(name.to_string()))
    }
}

fn collection_path(dir: &Path, name: &str) -> PathBuf {
    let stem = if name.is_empty() { EMPTY_STEM } else { name };
    dir.join(format!("{stem}.{EXTENSION}"))
}

fn collection_name(stem: &str) -> Option<&str> {
    if stem == EMPTY_STEM {
        Some("")
    } else {
        check_name(stem).ok().map(|()| stem)
    }
}

async fn load_collections(dir: &Path) -> BackendResult<HashMap<String, CollectionData>> {
    let mut collections = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let Some(name) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(collection_name)
        else {
            warn!(path = %path.display(), "skipping file with unusable collection name");
            continue;
        };
        let bytes = tokio::fs::read(&path).await?;
        let data: CollectionData = serde_json::from_slice(&bytes)?;
        collections.insert(name.to_string(), data);
    }
    Ok(collections)
}

async fn persist(dir: &Path, name: &str, data: &CollectionData) -> BackendResult<()> {
    let path = collection_path(dir, name);
    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    let bytes = serde_json::to_vec_pretty(data)?;
    {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

#[async_trait]
impl Connector for FileBackend {
    async fn connect(&self, options: &ConnectOptions) -> BackendResult<Arc<dyn Connection>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let collections = load_collections(&self.dir).await?;
        debug!(
            dir = %self.dir.display(),
            database = %options.database,
            collections = collections.len(),
            "file backend connected"
        );
        Ok(Arc::new(FileConnection {
            shared: Arc::new(FileShared {
                dir: self.dir.clone(),
                collections: Mutex::new(collections),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

struct FileShared {
    dir: PathBuf,
    collections: Mutex<HashMap<String, CollectionData>>,
    closed: AtomicBool,
}

impl FileShared {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }

    /// Apply `op` to a copy of collection `name`, persist the copy, then
    /// install it. The lock is held throughout so writes never interleave.
    async fn mutate<T>(
        &self,
        name: &str,
        op: impl FnOnce(&mut CollectionData) -> BackendResult<(T, bool)>,
    ) -> BackendResult<T> {
        self.ensure_open()?;
        let mut collections = self.collections.lock().await;
        let mut data = collections.get(name).cloned().unwrap_or_default();
        let (result, changed) = op(&mut data)?;
        if changed {
            persist(&self.dir, name, &data).await?;
            collections.insert(name.to_string(), data);
        }
        Ok(result)
    }
}

struct FileConnection {
    shared: Arc<FileShared>,
}

#[async_trait]
impl Connection for FileConnection {
    async fn ping(&self) -> BackendResult<()> {
        self.shared.ensure_open()?;
        match tokio::fs::metadata(&self.shared.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::Unreachable(format!(
                "{} is not a directory",
                self.shared.dir.display()
            ))),
            Err(e) => Err(BackendError::Unreachable(e.to_string())),
        }
    }

    async fn collection_names(&self) -> BackendResult<Vec<String>> {
        self.shared.ensure_open()?;
        let collections = self.shared.collections.lock().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn collection(&self, name: &str) -> BackendResult<Arc<dyn Collection>> {
        self.shared.ensure_open()?;
        check_name(name)?;
        Ok(Arc::new(FileCollection {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn drop_collection(&self, name: &str) -> BackendResult<bool> {
        self.shared.ensure_open()?;
        check_name(name)?;
        let mut collections = self.shared.collections.lock().await;
        if collections.remove(name).is_none() {
            return Ok(false);
        }
        match tokio::fs::remove_file(collection_path(&self.shared.dir, name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn physical_connections(&self) -> usize {
        1
    }

    async fn fsync(&self, index: usize) -> BackendResult<()> {
        self.shared.ensure_open()?;
        if index != 0 {
            return Err(BackendError::Driver(format!(
                "no physical connection {index}"
            )));
        }
        let collections = self.shared.collections.lock().await;
        for name in collections.keys() {
            let file = tokio::fs::File::open(collection_path(&self.shared.dir, name)).await?;
            file.sync_all().await?;
        }
        #[cfg(unix)]
        {
            let dir = tokio::fs::File::open(&self.shared.dir).await?;
            dir.sync_all().await?;
        }
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FileCollection {
    name: String,
    shared: Arc<FileShared>,
}

#[async_trait]
impl Collection for FileCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Filter, limit: Option<usize>) -> BackendResult<Vec<Document>> {
        self.shared.ensure_open()?;
        let collections = self.shared.collections.lock().await;
        Ok(collections
            .get(&self.name)
            .map(|data| memory::select(data, filter, limit))
            .unwrap_or_default())
    }

    async fn insert_one(&self, document: Document) -> BackendResult<()> {
        let name = self.name.clone();
        self.shared
            .mutate(&self.name, move |data| {
                memory::insert(data, &name, document).map(|()| ((), true))
            })
            .await
    }

    async fn update_one(&self, filter: &Filter, set: Document) -> BackendResult<UpdateOutcome> {
        self.shared
            .mutate(&self.name, |data| {
                memory::update(data, filter, set).map(|outcome| (outcome, outcome.modified > 0))
            })
            .await
    }

    async fn delete_one(&self, filter: &Filter) -> BackendResult<u64> {
        self.shared
            .mutate(&self.name, |data| {
                let deleted = memory::delete(data, filter);
                Ok((deleted, deleted > 0))
            })
            .await
    }
}
