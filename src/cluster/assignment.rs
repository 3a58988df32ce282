//! Shard assignment: choose one healthy replica per shard for a query.

use super::placement::{Host, ShardState, TopologySnapshot};
use crate::{Error, Result};
use std::collections::HashMap;

/// Produce a covering assignment: every shard in `[0, num_shards)` lands in
/// exactly one host's set, chosen among replicas whose state is `Available`.
///
/// Among the candidates for a shard, the host currently holding the fewest
/// assigned shards wins (host-ID order breaks ties), so the result is
/// deterministic for a given snapshot and roughly balanced. A shard with no
/// available replica fails the whole assignment; the caller is expected to
/// retry against a fresher snapshot.
pub fn calculate_shard_assignment(
    snapshot: &TopologySnapshot,
) -> Result<HashMap<Host, Vec<u32>>> {
    let mut hosts: Vec<_> = snapshot.host_shards().iter().collect();
    hosts.sort_by(|a, b| a.host.id.cmp(&b.host.id));

    let mut assignment: HashMap<Host, Vec<u32>> = HashMap::new();
    for shard in 0..snapshot.num_shards() {
        let candidate = hosts
            .iter()
            .filter(|hs| hs.shards.get(&shard) == Some(&ShardState::Available))
            .min_by_key(|hs| assignment.get(&hs.host).map_or(0, Vec::len))
            .ok_or(Error::IncompleteCoverage(shard))?;
        assignment
            .entry(candidate.host.clone())
            .or_default()
            .push(shard);
    }
    Ok(assignment)
}
