//! Placement model: instances, shards, and validated topology snapshots.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Lifecycle state of one shard replica on one instance.
///
/// The assignment planner only routes to `Available` replicas; other states
/// are visible in the snapshot but never chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    Available,
    Initializing,
    Leaving,
}

impl Default for ShardState {
    fn default() -> Self {
        ShardState::Available
    }
}

/// Raw placement as delivered by the placement store. Unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlacement {
    /// Replication factor every shard must satisfy.
    pub replicas: usize,
    /// Total shard count; valid shard IDs are `[0, num_shards)`.
    pub num_shards: u32,
    pub instances: Vec<PlacementInstance>,
}

/// One storage instance in the placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementInstance {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// `None` (as opposed to an empty list) marks a malformed instance.
    pub shards: Option<Vec<PlacementShard>>,
}

/// One shard replica declared by an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementShard {
    pub id: u32,
    #[serde(default)]
    pub state: ShardState,
}

/// An addressable datanode endpoint. Two hosts are equal iff their IDs are.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub addr: String,
}

impl Host {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One host together with the shard replicas it carries.
#[derive(Debug, Clone)]
pub struct HostShardSet {
    pub host: Host,
    pub shards: HashMap<u32, ShardState>,
}

/// Immutable, validated view of the placement.
///
/// Snapshots are built by the topology watcher and shared behind an `Arc`;
/// a query reads one snapshot for its whole lifetime.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    replicas: usize,
    num_shards: u32,
    host_shards: Vec<HostShardSet>,
}

impl TopologySnapshot {
    /// Validate a raw placement and build the snapshot.
    pub fn from_placement(placement: &ServicePlacement) -> Result<Self> {
        validate_instances(placement)?;

        let host_shards = placement
            .instances
            .iter()
            .map(|instance| HostShardSet {
                host: Host::new(
                    instance.id.clone(),
                    format!("{}:{}", instance.host, instance.port),
                ),
                shards: instance
                    .shards
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|s| (s.id, s.state))
                    .collect(),
            })
            .collect();

        Ok(Self {
            replicas: placement.replicas,
            num_shards: placement.num_shards,
            host_shards,
        })
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn host_shards(&self) -> &[HostShardSet] {
        &self.host_shards
    }
}

/// Check that every shard in `[0, num_shards)` is replicated at least
/// `replicas` times and that no instance declares a shard outside that range.
fn validate_instances(placement: &ServicePlacement) -> Result<()> {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for instance in &placement.instances {
        let shards = instance
            .shards
            .as_ref()
            .ok_or_else(|| Error::InstanceHasNoShards(instance.id.clone()))?;
        for shard in shards {
            *counts.entry(shard.id).or_default() += 1;
        }
    }

    for id in 0..placement.num_shards {
        match counts.remove(&id) {
            None => return Err(Error::MissingShard(id)),
            Some(count) if count < placement.replicas => {
                return Err(Error::NotEnoughReplicas {
                    shard: id,
                    actual: count,
                    expected: placement.replicas,
                });
            }
            Some(_) => {}
        }
    }

    if let Some(&id) = counts.keys().min() {
        return Err(Error::UnexpectedShard(id));
    }
    Ok(())
}
