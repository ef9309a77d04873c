//! In-memory registry of project handles.
//!
//! Each project name is in exactly one of three states:
//!
//! - absent: no entry in the map;
//! - [`ProjectSlot::Opening`]: one backend open is in flight, and every
//!   caller that asked for the project in the meantime waits on it;
//! - [`ProjectSlot::Open`]: a live project with `refcount >= 1` handles.
//!
//! The map lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use vds_types::ProjectName;

use crate::error::StorageResult;
use crate::project::{Project, ProjectHandle};

pub(crate) type Waiter = oneshot::Sender<StorageResult<ProjectHandle>>;

enum ProjectSlot {
    Opening(Vec<Waiter>),
    Open {
        project: Arc<Project>,
        refcount: usize,
    },
}

/// What a caller of [`Registry::acquire`] must do next.
pub(crate) enum Acquire {
    /// The project was open; here is a fresh handle.
    Ready(ProjectHandle),
    /// An open is already in flight; wait for its outcome.
    Joined(oneshot::Receiver<StorageResult<ProjectHandle>>),
    /// This caller must run the open sequence, then wait like everyone else.
    Start(oneshot::Receiver<StorageResult<ProjectHandle>>),
}

#[derive(Default)]
pub(crate) struct Registry {
    slots: Mutex<HashMap<ProjectName, ProjectSlot>>,
}

impl Registry {
    fn slots(&self) -> MutexGuard<'_, HashMap<ProjectName, ProjectSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn acquire(self: &Arc<Self>, name: &ProjectName) -> Acquire {
        let mut slots = self.slots();
        match slots.get_mut(name) {
            Some(ProjectSlot::Open { project, refcount }) => {
                *refcount += 1;
                debug!(project = %name, refcount = *refcount, "project handle shared");
                Acquire::Ready(ProjectHandle::new(Arc::clone(project), Arc::clone(self)))
            }
            Some(ProjectSlot::Opening(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(project = %name, waiting = waiters.len(), "joined pending project open");
                Acquire::Joined(rx)
            }
            None => {
                let (tx, rx) = oneshot::channel();
                slots.insert(name.clone(), ProjectSlot::Opening(vec![tx]));
                Acquire::Start(rx)
            }
        }
    }

    /// Finish the open sequence for `name` and answer every waiter.
    ///
    /// On success the project becomes `Open` with one reference per waiter;
    /// on failure the entry is removed so a later open starts afresh.
    pub(crate) fn resolve(self: &Arc<Self>, name: &ProjectName, outcome: StorageResult<Arc<Project>>) {
        let waiters = {
            let mut slots = self.slots();
            let waiters = match slots.remove(name) {
                Some(ProjectSlot::Opening(waiters)) => waiters,
                Some(other) => {
                    warn!(project = %name, "open resolved for a project that is not opening");
                    slots.insert(name.clone(), other);
                    return;
                }
                None => {
                    warn!(project = %name, "open resolved for an unregistered project");
                    return;
                }
            };
            if let Ok(project) = &outcome {
                slots.insert(
                    name.clone(),
                    ProjectSlot::Open {
                        project: Arc::clone(project),
                        refcount: waiters.len(),
                    },
                );
            }
            waiters
        };

        match &outcome {
            Ok(_) => debug!(project = %name, refcount = waiters.len(), "project opened"),
            Err(e) => warn!(project = %name, error = %e, waiters = waiters.len(), "project open failed"),
        }

        // The lock is released: a handle that cannot be delivered is dropped
        // here and gives its reference back through `release`.
        for waiter in waiters {
            let reply = match &outcome {
                Ok(project) => Ok(ProjectHandle::new(Arc::clone(project), Arc::clone(self))),
                Err(e) => Err(e.clone()),
            };
            let _ = waiter.send(reply);
        }
    }

    /// Drop one reference to `name`, removing the entry at zero.
    pub(crate) fn release(&self, name: &ProjectName) {
        let mut slots = self.slots();
        match slots.get_mut(name) {
            Some(ProjectSlot::Open { refcount, .. }) if *refcount > 1 => {
                *refcount -= 1;
                debug!(project = %name, refcount = *refcount, "project handle released");
            }
            Some(ProjectSlot::Open { .. }) => {
                slots.remove(name);
                debug!(project = %name, "project closed");
            }
            _ => warn!(project = %name, "release of a project that is not open"),
        }
    }

    /// Number of live handles, or `None` unless the project is `Open`.
    pub(crate) fn refcount(&self, name: &ProjectName) -> Option<usize> {
        match self.slots().get(name) {
            Some(ProjectSlot::Open { refcount, .. }) => Some(*refcount),
            _ => None,
        }
    }

    /// Number of projects opening or open.
    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }

    /// Whether `name` is opening or open.
    pub(crate) fn is_registered(&self, name: &ProjectName) -> bool {
        self.slots().contains_key(name)
    }
}
