//! Registry of live workers.
//!
//! Workers are keyed by job UID. A secondary index maps each job's namespaced
//! name to the UID of its newest worker, so that a pod owned by a different
//! generation of a job still reaches the worker that can classify it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::store::ObjectStore;
use crate::types::{JobKey, JobUid, Pod};
use crate::worker::Worker;

/// A registered worker and its background task.
pub struct WorkerHandle<S> {
    pub worker: Arc<Worker<S>>,

    /// Cancellation token for the worker's statistics task.
    cancel: CancellationToken,

    /// Handle to the worker's statistics task.
    task: JoinHandle<()>,
}

impl<S> WorkerHandle<S> {
    /// Stops the statistics task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops the statistics task and waits for it to exit.
    pub async fn stop_and_join(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct Maps<S> {
    by_uid: HashMap<JobUid, WorkerHandle<S>>,
    by_name: HashMap<JobKey, JobUid>,
}

/// Concurrency-safe map from job identity to worker.
///
/// Lookups take the read lock; registration and removal take the write lock.
pub struct Registry<S> {
    maps: RwLock<Maps<S>>,
}

impl<S: ObjectStore> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ObjectStore> Registry<S> {
    pub fn new() -> Self {
        Registry {
            maps: RwLock::new(Maps {
                by_uid: HashMap::new(),
                by_name: HashMap::new(),
            }),
        }
    }

    pub async fn get(&self, uid: &JobUid) -> Option<Arc<Worker<S>>> {
        self.maps
            .read()
            .await
            .by_uid
            .get(uid)
            .map(|h| Arc::clone(&h.worker))
    }

    pub async fn contains(&self, uid: &JobUid) -> bool {
        self.maps.read().await.by_uid.contains_key(uid)
    }

    /// Finds the worker responsible for a pod.
    ///
    /// Matches on the owner UID first, then on the owner's namespaced name if
    /// the owner kind agrees with the registered job's kind.
    pub async fn route(&self, pod: &Pod) -> Option<Arc<Worker<S>>> {
        let owner = pod.controller_owner()?;
        let maps = self.maps.read().await;
        if let Some(handle) = maps.by_uid.get(&owner.uid) {
            return Some(Arc::clone(&handle.worker));
        }

        let uid = maps.by_name.get(&pod.owner_key()?)?;
        let handle = maps.by_uid.get(uid)?;
        if handle.worker.identity().kind != owner.kind {
            return None;
        }
        trace!(pod = %pod, job = %handle.worker.identity(), "Routed pod by owner name");
        Some(Arc::clone(&handle.worker))
    }

    /// Registers a worker unless one already exists for its UID.
    ///
    /// `spawn` starts the worker's background task and is only called if the
    /// worker is registered. Returns false if another worker won the race.
    pub async fn register<F>(
        &self,
        worker: Arc<Worker<S>>,
        cancel: CancellationToken,
        spawn: F,
    ) -> bool
    where
        F: FnOnce(Arc<Worker<S>>, CancellationToken) -> JoinHandle<()>,
    {
        let identity = worker.identity().clone();
        let mut maps = self.maps.write().await;
        if maps.by_uid.contains_key(&identity.uid) {
            return false;
        }

        let task = spawn(Arc::clone(&worker), cancel.clone());
        maps.by_name.insert(identity.key(), identity.uid.clone());
        maps.by_uid.insert(
            identity.uid,
            WorkerHandle {
                worker,
                cancel,
                task,
            },
        );
        true
    }

    /// Removes the worker for `uid`, returning its handle.
    pub async fn remove(&self, uid: &JobUid) -> Option<WorkerHandle<S>> {
        let mut maps = self.maps.write().await;
        let handle = maps.by_uid.remove(uid)?;
        let key = handle.worker.identity().key();
        // A newer generation may have claimed the name already.
        if maps.by_name.get(&key) == Some(uid) {
            maps.by_name.remove(&key);
        }
        Some(handle)
    }

    /// Removes and returns every worker.
    pub async fn drain(&self) -> Vec<WorkerHandle<S>> {
        let mut maps = self.maps.write().await;
        maps.by_name.clear();
        maps.by_uid.drain().map(|(_, handle)| handle).collect()
    }

    /// Returns every registered worker.
    pub async fn workers(&self) -> Vec<Arc<Worker<S>>> {
        self.maps
            .read()
            .await
            .by_uid
            .values()
            .map(|h| Arc::clone(&h.worker))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.maps.read().await.by_uid.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
