//! HCCL Controller - builds rank tables for distributed accelerator jobs.
//!
//! Pod and job-group events from the cluster are folded, per job, into a rank
//! table describing every device of the job. Once every replica has reported
//! its devices, the table is published as one or more job summary records
//! for the training pods to read.

pub mod agent;
pub mod config;
pub mod ranktable;
pub mod server;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_utils;
