//! File-backed object store.
//!
//! Each record is stored as `<root>/<namespace>/<name>.json`.
//!
//! # Atomic Writes
//!
//! Records are written using a write-to-temp-then-rename pattern:
//! 1. Write to `<name>.json.tmp`
//! 2. fsync the file
//! 3. Rename to `<name>.json`
//! 4. fsync the directory
//!
//! Readers always see either the old or the new record, never a partial write.
//! All filesystem work runs on tokio's blocking pool.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{JobSummary, ObjectStore, Result, StoreError};

const RECORD_EXTENSION: &str = "json";

/// Object store persisting records under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(format!("{name}.{RECORD_EXTENSION}"))
    }

    fn read(&self, namespace: &str, name: &str) -> Result<JobSummary> {
        let path = self.record_path(namespace, name);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::not_found(namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, record: &JobSummary) -> Result<()> {
        let path = self.record_path(&record.namespace, &record.name);
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &bytes)?;
        Ok(())
    }
}

/// Writes `bytes` to `path` so that readers never observe a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    // The rename is only durable once the directory entry is synced.
    File::open(parent)?.sync_all()
}

impl FileStore {
    fn create_record(&self, record: &JobSummary) -> Result<()> {
        if self.record_path(&record.namespace, &record.name).exists() {
            return Err(StoreError::already_exists(&record.namespace, &record.name));
        }
        self.write(record)
    }

    fn update_record(&self, record: &JobSummary) -> Result<()> {
        if !self.record_path(&record.namespace, &record.name).exists() {
            return Err(StoreError::not_found(&record.namespace, &record.name));
        }
        self.write(record)
    }

    fn delete_record(&self, namespace: &str, name: &str) -> Result<()> {
        match fs::remove_file(self.record_path(namespace, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::not_found(namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_records(&self) -> Result<Vec<JobSummary>> {
        let namespaces = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for namespace in namespaces {
            let namespace = namespace?;
            if !namespace.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(namespace.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                let bytes = fs::read(&path)?;
                match serde_json::from_slice::<JobSummary>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
                }
            }
        }
        records.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(records)
    }
}

/// Runs filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable(format!("file store task failed: {e}")))?
}

impl ObjectStore for FileStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<JobSummary> {
        let store = self.clone();
        let (namespace, name) = (namespace.to_string(), name.to_string());
        blocking(move || store.read(&namespace, &name)).await
    }

    async fn create(&self, record: &JobSummary) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        blocking(move || store.create_record(&record)).await
    }

    async fn update(&self, record: &JobSummary) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        blocking(move || store.update_record(&record)).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let store = self.clone();
        let (namespace, name) = (namespace.to_string(), name.to_string());
        blocking(move || store.delete_record(&namespace, &name)).await
    }

    async fn list(&self) -> Result<Vec<JobSummary>> {
        let store = self.clone();
        blocking(move || store.list_records()).await
    }
}
