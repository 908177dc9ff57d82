//! Per-job workers.
//!
//! Each job gets a dedicated [`Worker`] that owns the job's rank table. Pod
//! events for one job serialize on that worker's lock; workers for different
//! jobs never block each other.
//!
//! # Module Structure
//!
//! - [`worker`]: The state machine, its errors and configuration
//! - [`publish`]: Writing shards to the job summary records
//! - [`stats`]: Background statistics reporter

mod publish;
mod stats;
#[allow(clippy::module_inception)]
mod worker;


pub use stats::run_stats;
pub use worker::{
    DEFAULT_ACCELERATOR_FAMILY, DEFAULT_ACCELERATOR_RESOURCE, ErrorKind, Outcome, Result, Worker,
    WorkerConfig, WorkerError, WorkerSnapshot,
};
