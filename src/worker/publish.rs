//! Writing a rank table out to the job summary records.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::ranktable::Shard;
use crate::store::{JobStatus, ObjectStore, base_name, shard_name};

use super::worker::{Result, WorkerConfig, WorkerError};

/// Writes `shards` with `status` into the job's summary records.
///
/// Shard 0 must already exist, carry the configured accelerator label and
/// belong to this worker's job generation; other shards are created on first write. Records left over from a larger
/// previous shard total are deleted.
pub(super) async fn write_shards<S: ObjectStore>(
    store: &S,
    config: &WorkerConfig,
    shards: &[Shard],
    status: JobStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let namespace = &config.identity.namespace;
    let base = base_name(&config.identity.name);
    let head = store.get(namespace, &base).await?;
    if head.family() != Some(config.accelerator_family.as_str()) {
        return Err(WorkerError::MissingLabel {
            namespace: namespace.clone(),
            name: base,
            family: config.accelerator_family.clone(),
        });
    }
    if head.job_uid != config.identity.uid {
        return Err(WorkerError::Superseded {
            job: config.identity.uid.clone(),
            owner: head.job_uid,
        });
    }
    let previous_total = head.shard_total;

    // Shard 0 goes last so its total never names a shard that is missing.
    for shard in shards.iter().rev() {
        let mut record = head.for_shard(shard.index, shard.total);
        record.set_payload(shard.payload.clone());
        record.job_status = status;
        record.update_time = now.timestamp();

        if shard.index == 0 {
            store.update(&record).await?;
            continue;
        }
        match store.update(&record).await {
            Err(e) if e.is_not_found() => store.create(&record).await?,
            other => other?,
        }
    }

    for index in shards.len()..previous_total {
        let name = shard_name(&base, index);
        match store.delete(namespace, &name).await {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => debug!(shard = %name, "Removed surplus shard"),
        }
    }

    Ok(())
}
