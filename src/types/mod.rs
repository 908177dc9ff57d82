//! Core domain types for the controller.
//!
//! Identifiers, the pod and job-group payloads, and the event enum that the
//! event source decodes into.

pub mod event;
pub mod ids;
pub mod job;
pub mod pod;

pub use event::{ClusterEvent, JobEventKind, PodEventKind};
pub use ids::{JobIdentity, JobKey, JobUid, PodUid};
pub use job::{FRAMEWORK_LABEL, JobGroup};
pub use pod::{Container, OwnerReference, Pod, PodPhase};
