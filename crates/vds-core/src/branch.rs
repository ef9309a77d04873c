//! The branch compare-and-swap protocol.
//!
//! A branch is one document in its project's collection:
//!
//! ```text
//! { "_id": "*main", "hash": "#..." }
//! ```
//!
//! An absent document means the branch is absent. Every write names the
//! value the caller believes is stored and is expressed as a *conditional*
//! backend write filtered on that value:
//!
//! | old | new | backend write |
//! |---|---|---|
//! | absent | `#b` | `insert_one` (duplicate key → conflict) |
//! | `#a` | absent | `delete_one` where `hash == #a` |
//! | `#a` | `#b` | `update_one` where `hash == #a` |
//!
//! A backend call that succeeds but matched nothing is a lost race, and is
//! reported as [`StorageError::Conflict`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;
use vds_backend::{BackendError, Collection, Filter};
use vds_types::{BranchName, Document, ObjectHash, TypeError, ID_FIELD};

use crate::error::{StorageError, StorageResult};

/// Document field holding a branch's target hash.
pub const HASH_FIELD: &str = "hash";

/// One named branch pointer of a project.
///
/// Waiters in [`Branch::get_hash`] are woken by writes made through this
/// `Branch`. Writes by other clients are only seen when a waiter times out
/// and re-reads.
pub struct Branch {
    name: BranchName,
    collection: Arc<dyn Collection>,
    changed: Notify,
}

impl Branch {
    pub(crate) fn new(collection: Arc<dyn Collection>, name: BranchName) -> Self {
        Self {
            name,
            collection,
            changed: Notify::new(),
        }
    }

    pub fn name(&self) -> &BranchName {
        &self.name
    }

    /// Read the stored hash without waiting.
    pub async fn read_hash(&self) -> StorageResult<Option<ObjectHash>> {
        let document = self
            .collection
            .find_one(&Filter::id(self.name.as_str()))
            .await?;
        document.map(|d| stored_hash(&d)).transpose()
    }

    /// CAS read: return the stored hash as soon as it differs from
    /// `expected`.
    ///
    /// If the stored value already differs it is returned immediately.
    /// Otherwise the call waits for a write to this branch, or for `timeout`,
    /// and then returns whatever is stored at that point (which may still
    /// equal `expected`).
    pub async fn get_hash(
        &self,
        expected: Option<&ObjectHash>,
        timeout: Duration,
    ) -> StorageResult<Option<ObjectHash>> {
        // Register before reading so a write landing between the read and
        // the wait is not missed.
        let notified = self.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let current = self.read_hash().await?;
        if current.as_ref() != expected {
            return Ok(current);
        }
        if tokio::time::timeout(timeout, notified).await.is_err() {
            debug!(branch = %self.name, "branch unchanged until timeout");
        }
        self.read_hash().await
    }

    /// CAS write: move the branch from `old` to `new`.
    ///
    /// `None` stands for "absent" on either side; both absent is rejected.
    pub async fn set_hash(
        &self,
        old: Option<&ObjectHash>,
        new: Option<&ObjectHash>,
    ) -> StorageResult<()> {
        let applied = match (old, new) {
            (None, None) => {
                return Err(TypeError::InvalidDocument(format!(
                    "update of {} needs an old or a new hash",
                    self.name
                ))
                .into())
            }
            (None, Some(new)) => match self.collection.insert_one(self.document(new)).await {
                Ok(()) => true,
                Err(BackendError::DuplicateKey { .. }) => false,
                Err(e) => return Err(e.into()),
            },
            (Some(old), None) => self.collection.delete_one(&self.filter(old)).await? > 0,
            (Some(old), Some(new)) => {
                let mut set = Document::new();
                set.insert(HASH_FIELD.into(), Value::String(new.as_str().into()));
                let outcome = self.collection.update_one(&self.filter(old), set).await?;
                outcome.matched > 0
            }
        };

        if !applied {
            debug!(branch = %self.name, "branch CAS lost");
            return Err(StorageError::Conflict {
                branch: self.name.clone(),
                expected: old.cloned(),
            });
        }

        debug!(
            branch = %self.name,
            old = old.map_or("", ObjectHash::as_str),
            new = new.map_or("", ObjectHash::as_str),
            "branch updated"
        );
        self.changed.notify_waiters();
        Ok(())
    }

    fn filter(&self, hash: &ObjectHash) -> Filter {
        Filter::id(self.name.as_str()).field(HASH_FIELD, hash.as_str())
    }

    fn document(&self, hash: &ObjectHash) -> Document {
        let mut document = Document::new();
        document.insert(ID_FIELD.into(), Value::String(self.name.as_str().into()));
        document.insert(HASH_FIELD.into(), Value::String(hash.as_str().into()));
        document
    }
}

/// Extract the target hash of a stored branch document.
pub(crate) fn stored_hash(document: &Document) -> StorageResult<ObjectHash> {
    match document.get(HASH_FIELD) {
        Some(Value::String(hash)) => Ok(ObjectHash::parse(hash)?),
        _ => Err(TypeError::InvalidDocument(format!("branch document without {HASH_FIELD}")).into()),
    }
}
