//! Cluster object store for job summary records.
//!
//! The controller never talks to the cluster directly. Workers and the job
//! factory read and write job summaries through [`ObjectStore`], which gives
//! read-your-writes semantics for a single client and reports "not found" and
//! "already exists" as distinct errors.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: in-process map, with fault injection for tests
//! - [`FileStore`]: one JSON file per record, written atomically

use std::future::Future;
use std::io;

use thiserror::Error;

pub mod file;
pub mod memory;
pub mod summary;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use summary::{
    ACCELERATOR_LABEL, JobStatus, JobSummary, Operator, SUMMARY_NAME_PREFIX, base_name, checksum,
    shard_name,
};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this name exists.
    #[error("record {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// A record with this name already exists.
    #[error("record {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    /// The store rejected or failed the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(namespace: &str, name: &str) -> Self {
        StoreError::AlreadyExists {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Reads and writes job summary records.
///
/// Records are addressed by `(namespace, name)`.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetches a record.
    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<JobSummary>> + Send;

    /// Creates a record, failing with `AlreadyExists` if the name is taken.
    fn create(&self, record: &JobSummary) -> impl Future<Output = Result<()>> + Send;

    /// Replaces a record, failing with `NotFound` if it does not exist.
    fn update(&self, record: &JobSummary) -> impl Future<Output = Result<()>> + Send;

    /// Deletes a record, failing with `NotFound` if it does not exist.
    fn delete(&self, namespace: &str, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Lists every record in every namespace.
    fn list(&self) -> impl Future<Output = Result<Vec<JobSummary>>> + Send;
}
