//! Projects: one backend collection holding objects and branches.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use vds_backend::{BackendError, Collection, Filter};
use vds_types::{BranchName, Document, Object, ObjectHash, ProjectName, ID_FIELD};

use crate::branch::{stored_hash, Branch};
use crate::error::{StorageError, StorageResult};
use crate::hasher::ObjectHasher;
use crate::registry::Registry;

/// Per-database settings every project inherits.
#[derive(Clone)]
pub(crate) struct ProjectSettings {
    pub(crate) hasher: Option<Arc<dyn ObjectHasher>>,
    pub(crate) branch_poll_timeout: Duration,
}

/// A named namespace of objects and branches.
///
/// Obtained through [`Database::open_project`](crate::Database::open_project)
/// as a [`ProjectHandle`]; all handles for one name share one `Project`.
pub struct Project {
    name: ProjectName,
    collection: Arc<dyn Collection>,
    /// Branches some caller is currently using; entries die with their last user.
    branches: Mutex<HashMap<BranchName, Weak<Branch>>>,
    settings: ProjectSettings,
}

impl Project {
    pub(crate) fn new(
        name: ProjectName,
        collection: Arc<dyn Collection>,
        settings: ProjectSettings,
    ) -> Self {
        Self {
            name,
            collection,
            branches: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn name(&self) -> &ProjectName {
        &self.name
    }

    // ---- Objects ----

    /// Fetch the object stored under exactly `hash`.
    ///
    /// A string that is not a valid hash cannot name a stored object, so it
    /// is reported as `NotFound` without touching the backend.
    pub async fn load_object(&self, hash: &str) -> StorageResult<Object> {
        let not_found = || StorageError::not_found(format!("object {hash} in {}", self.name));
        if !ObjectHash::is_valid(hash) {
            return Err(not_found());
        }
        let document = self
            .collection
            .find_one(&Filter::id(hash))
            .await?
            .ok_or_else(not_found)?;
        Ok(Object::from_document(document)?)
    }

    /// Store an object under its `_id`.
    ///
    /// The `_id` must be a valid hash; nothing is written otherwise.
    /// Inserting a hash that is already stored succeeds without writing,
    /// since equal hashes denote equal content.
    pub async fn insert_object(&self, document: Document) -> StorageResult<ObjectHash> {
        let object = Object::from_document(document)?;
        if let Some(hasher) = &self.settings.hasher {
            hasher.verify(&object)?;
        }
        let hash = object.hash().clone();
        match self.collection.insert_one(object.into_document()).await {
            Ok(()) => Ok(hash),
            Err(BackendError::DuplicateKey { .. }) => {
                debug!(project = %self.name, hash = %hash, "object already stored");
                Ok(hash)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve an abbreviated hash to the unique stored hash it begins.
    ///
    /// At most two candidates are fetched: none is `NotFound`, two is
    /// `Ambiguous` however many more there may be.
    pub async fn find_hash(&self, prefix: &str) -> StorageResult<ObjectHash> {
        ObjectHash::parse(prefix)?;
        let mut matches = self
            .collection
            .find(&Filter::id_prefix(prefix), Some(2))
            .await?;
        match matches.len() {
            0 => Err(StorageError::not_found(format!(
                "hash {prefix} in {}",
                self.name
            ))),
            1 => {
                let document = matches.remove(0);
                Ok(Object::from_document(document)?.hash().clone())
            }
            _ => Err(StorageError::Ambiguous {
                prefix: prefix.to_string(),
            }),
        }
    }

    /// Every stored object (branches excluded), in hash order.
    pub async fn dump_objects(&self) -> StorageResult<Vec<Object>> {
        let documents = self
            .collection
            .find(&Filter::id_prefix(ObjectHash::SIGIL.to_string()), None)
            .await?;
        documents
            .into_iter()
            .map(|d| Object::from_document(d).map_err(StorageError::from))
            .collect()
    }

    // ---- Branches ----

    /// The shared [`Branch`] for `name`, so all local readers and writers of
    /// one branch see each other's notifications while any of them is live.
    pub fn branch(&self, name: &BranchName) -> Arc<Branch> {
        let mut branches = self
            .branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(branch) = branches.get(name).and_then(Weak::upgrade) {
            return branch;
        }
        branches.retain(|_, branch| branch.strong_count() > 0);
        let branch = Arc::new(Branch::new(Arc::clone(&self.collection), name.clone()));
        branches.insert(name.clone(), Arc::downgrade(&branch));
        branch
    }

    /// All branches and the hashes they point to.
    pub async fn get_branch_names(&self) -> StorageResult<BTreeMap<BranchName, ObjectHash>> {
        let documents = self
            .collection
            .find(&Filter::id_prefix(BranchName::SIGIL.to_string()), None)
            .await?;
        let mut branches = BTreeMap::new();
        for document in documents {
            let id = document.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default();
            let entry = BranchName::parse(id)
                .map_err(StorageError::from)
                .and_then(|name| Ok((name, stored_hash(&document)?)));
            match entry {
                Ok((name, hash)) => {
                    branches.insert(name, hash);
                }
                Err(e) => warn!(project = %self.name, id, error = %e, "skipping malformed branch"),
            }
        }
        Ok(branches)
    }

    /// Current hash of `name` without waiting; `None` if the branch is absent.
    pub async fn read_branch_hash(&self, name: &BranchName) -> StorageResult<Option<ObjectHash>> {
        self.branch(name).read_hash().await
    }

    /// CAS read of `name`: returns at once if the stored hash differs from
    /// `expected`, otherwise after the next local update or the configured
    /// branch poll timeout.
    pub async fn get_branch_hash(
        &self,
        name: &BranchName,
        expected: Option<&ObjectHash>,
    ) -> StorageResult<Option<ObjectHash>> {
        self.branch(name)
            .get_hash(expected, self.settings.branch_poll_timeout)
            .await
    }

    /// CAS write of `name` from `old` to `new`; `None` means absent.
    ///
    /// Fails with [`StorageError::Conflict`] if the stored value is not `old`.
    pub async fn set_branch_hash(
        &self,
        name: &BranchName,
        old: Option<&ObjectHash>,
        new: Option<&ObjectHash>,
    ) -> StorageResult<()> {
        self.branch(name).set_hash(old, new).await
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("collection", &self.collection.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProjectHandle
// ---------------------------------------------------------------------------

/// One counted reference to an open [`Project`].
///
/// Dereferences to the project. Closing (or dropping) the handle gives the
/// reference back; when the last one goes, the project leaves the database's
/// registry and its collection handle is released.
pub struct ProjectHandle {
    project: Arc<Project>,
    registry: Arc<Registry>,
}

impl ProjectHandle {
    pub(crate) fn new(project: Arc<Project>, registry: Arc<Registry>) -> Self {
        Self { project, registry }
    }

    /// Give this reference back.
    pub fn close(self) {}
}

impl Deref for ProjectHandle {
    type Target = Project;

    fn deref(&self) -> &Project {
        &self.project
    }
}

impl Drop for ProjectHandle {
    fn drop(&mut self) {
        self.registry.release(self.project.name());
    }
}

impl fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProjectHandle").field(&self.project.name).finish()
    }
}
