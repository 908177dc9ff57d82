//! Size-bounded serialization of a rank table.
//!
//! The record type backing the job summary has a per-record size limit. Tables
//! with more devices than [`SHARD_DEVICE_THRESHOLD`] are split into contiguous
//! runs of servers, each serialized as a standalone table fragment, so that
//! every write stays bounded and can be retried independently.

use serde::Serialize;

use super::table::{RankTable, Server};
use super::{RankTableStatus, Result};

/// Maximum number of devices in one shard.
pub const SHARD_DEVICE_THRESHOLD: usize = 8000;

/// One serialized fragment of a rank table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub total: usize,
    /// Number of devices in this fragment.
    pub device_count: usize,
    /// The fragment as rank-table JSON.
    pub payload: String,
}

/// Borrowed view of a table, or a run of its servers, in wire layout.
#[derive(Serialize)]
struct Fragment<'a> {
    status: RankTableStatus,
    server_list: &'a [Server],
    server_count: String,
    version: &'a str,
}

impl<'a> Fragment<'a> {
    fn of(table: &'a RankTable, servers: &'a [Server]) -> Self {
        Fragment {
            status: table.status,
            server_list: servers,
            server_count: servers.len().to_string(),
            version: &table.version,
        }
    }
}

fn device_total(servers: &[Server]) -> usize {
    servers.iter().map(|s| s.device.len()).sum()
}

/// Splits `table` into shards of at most `threshold` devices.
///
/// A table at or below the threshold, including an empty one, yields a single
/// shard. Otherwise each shard holds `threshold / devices_per_server` servers,
/// where `devices_per_server` is the largest device count of any server.
pub(super) fn slice(table: &RankTable, threshold: usize) -> Result<Vec<Shard>> {
    let threshold = threshold.max(1);
    let servers = table.server_list.as_slice();
    let devices = device_total(servers);

    if devices <= threshold {
        let payload = serde_json::to_string(&Fragment::of(table, servers))?;
        return Ok(vec![Shard {
            index: 0,
            total: 1,
            device_count: devices,
            payload,
        }]);
    }

    let per_server = servers.iter().map(|s| s.device.len()).max().unwrap_or(1).max(1);
    let servers_per_shard = (threshold / per_server).max(1);
    let chunks: Vec<&[Server]> = servers.chunks(servers_per_shard).collect();
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            Ok(Shard {
                index,
                total,
                device_count: device_total(chunk),
                payload: serde_json::to_string(&Fragment::of(table, chunk))?,
            })
        })
        .collect()
}
