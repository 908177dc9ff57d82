//! Garbage collection of job summaries marked for deletion.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::store::{ObjectStore, Result};

/// Deletes every record marked for deletion more than `retention` before `now`.
///
/// Returns the number of records removed. A record that disappears between
/// the listing and the delete is not an error.
pub async fn sweep_deleted<S: ObjectStore>(
    store: &S,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut removed = 0;
    for record in store.list().await? {
        if !record.is_expired(retention, now) {
            continue;
        }
        match store.delete(&record.namespace, &record.name).await {
            Ok(()) => removed += 1,
            Err(e) if e.is_not_found() => {
                debug!(record = %record.name, "Expired record already gone");
            }
            Err(e) => return Err(e),
        }
    }

    if removed > 0 {
        info!(removed, "Swept expired job summaries");
    }
    Ok(removed)
}
