//! In-process object store.
//!
//! Used by tests and dry runs. Supports two kinds of fault injection:
//! failing every write, and hiding freshly created records from a number of
//! subsequent reads to mimic eventual consistency.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{JobSummary, ObjectStore, Result, StoreError};

type Key = (String, String);

#[derive(Default)]
struct MemoryStoreInner {
    records: Mutex<BTreeMap<Key, JobSummary>>,
    /// Remaining reads for which a newly created record stays invisible.
    hidden: Mutex<HashMap<Key, usize>>,
    visibility_lag: AtomicUsize,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

/// Object store backed by a map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hides each newly created record from the next `reads` reads of it.
    pub fn set_visibility_lag(&self, reads: usize) {
        self.inner.visibility_lag.store(reads, Ordering::SeqCst);
    }

    /// Number of successful create/update/delete operations so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Returns a record without going through visibility simulation.
    pub fn peek(&self, namespace: &str, name: &str) -> Option<JobSummary> {
        self.records().get(&key(namespace, name)).cloned()
    }

    /// Inserts or replaces a record directly, bypassing fault injection.
    pub fn insert(&self, record: JobSummary) {
        self.records()
            .insert(key(&record.namespace, &record.name), record);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<Key, JobSummary>> {
        // A panic while holding the lock cannot leave a half-written record.
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hidden(&self) -> MutexGuard<'_, HashMap<Key, usize>> {
        self.inner
            .hidden
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl ObjectStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<JobSummary> {
        let k = key(namespace, name);
        {
            let mut hidden = self.hidden();
            if let Some(remaining) = hidden.get_mut(&k) {
                *remaining -= 1;
                if *remaining == 0 {
                    hidden.remove(&k);
                }
                return Err(StoreError::not_found(namespace, name));
            }
        }
        self.records()
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::not_found(namespace, name))
    }

    async fn create(&self, record: &JobSummary) -> Result<()> {
        self.check_writable()?;
        let k = key(&record.namespace, &record.name);
        {
            let mut records = self.records();
            if records.contains_key(&k) {
                return Err(StoreError::already_exists(&record.namespace, &record.name));
            }
            records.insert(k.clone(), record.clone());
        }
        let lag = self.inner.visibility_lag.load(Ordering::SeqCst);
        if lag > 0 {
            self.hidden().insert(k, lag);
        }
        self.record_write();
        Ok(())
    }

    async fn update(&self, record: &JobSummary) -> Result<()> {
        self.check_writable()?;
        let updated = match self
            .records()
            .get_mut(&key(&record.namespace, &record.name))
        {
            Some(existing) => {
                *existing = record.clone();
                true
            }
            None => false,
        };
        if !updated {
            return Err(StoreError::not_found(&record.namespace, &record.name));
        }
        self.record_write();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_writable()?;
        let removed = self.records().remove(&key(namespace, name));
        match removed {
            Some(_) => {
                self.record_write();
                Ok(())
            }
            None => Err(StoreError::not_found(namespace, name)),
        }
    }

    async fn list(&self) -> Result<Vec<JobSummary>> {
        Ok(self.records().values().cloned().collect())
    }
}
