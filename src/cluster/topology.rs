//! Dynamic topology: a live, validated view of the shard placement.
//!
//! The placement itself is curated externally and delivered through a
//! key/value watch. The watcher validates every update and publishes
//! immutable snapshots with a single atomic swap; readers never block the
//! update path, and an invalid update leaves the last good snapshot in
//! effect.

use super::placement::{ServicePlacement, TopologySnapshot};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WATCH_BUFFER: usize = 16;

/// Watchable source of placement updates, keyed by service ID.
///
/// Production deployments back this with the cluster's config store;
/// [`LocalPlacementStore`] keeps everything in memory for tests and
/// single-process development.
#[async_trait]
pub trait PlacementStore: Send + Sync {
    /// Open a watch for the placement of `service_id`. The current placement
    /// is delivered as the first value on the channel.
    async fn watch(&self, service_id: &str) -> Result<mpsc::Receiver<ServicePlacement>>;

    /// Mark shard replicas on an instance as available. Optimistic: callers
    /// accept that concurrent updates may override each other.
    async fn mark_shards_available(
        &self,
        service_id: &str,
        instance_id: &str,
        shard_ids: &[u32],
    ) -> Result<()>;
}

struct LocalState {
    placement: Option<ServicePlacement>,
    subscribers: Vec<mpsc::Sender<ServicePlacement>>,
}

/// In-memory placement store.
pub struct LocalPlacementStore {
    state: Mutex<LocalState>,
}

impl LocalPlacementStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LocalState {
                placement: None,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn with_placement(placement: ServicePlacement) -> Self {
        let store = Self::new();
        store.update(placement);
        store
    }

    /// Publish a new placement to every open watch.
    pub fn update(&self, placement: ServicePlacement) {
        let mut state = self.state.lock();
        state.placement = Some(placement.clone());
        state.subscribers.retain(|tx| match tx.try_send(placement.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("placement watcher lagging, dropping update for it");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl Default for LocalPlacementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacementStore for LocalPlacementStore {
    async fn watch(&self, _service_id: &str) -> Result<mpsc::Receiver<ServicePlacement>> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let mut state = self.state.lock();
        if let Some(placement) = &state.placement {
            // buffer is empty at this point, try_send cannot fail
            let _ = tx.try_send(placement.clone());
        }
        state.subscribers.push(tx);
        Ok(rx)
    }

    async fn mark_shards_available(
        &self,
        _service_id: &str,
        instance_id: &str,
        shard_ids: &[u32],
    ) -> Result<()> {
        let updated = {
            let mut state = self.state.lock();
            let placement = state
                .placement
                .as_mut()
                .ok_or_else(|| Error::Internal("no placement to update".to_string()))?;
            let instance = placement
                .instances
                .iter_mut()
                .find(|i| i.id == instance_id)
                .ok_or_else(|| Error::Internal(format!("unknown instance {instance_id}")))?;
            let shards = instance
                .shards
                .as_mut()
                .ok_or_else(|| Error::InstanceHasNoShards(instance_id.to_string()))?;
            for shard in shards.iter_mut() {
                if shard_ids.contains(&shard.id) {
                    shard.state = super::placement::ShardState::Available;
                }
            }
            placement.clone()
        };
        self.update(updated);
        Ok(())
    }
}

/// Live topology fed by a placement watch.
pub struct DynamicTopology {
    store: Arc<dyn PlacementStore>,
    service_id: String,
    snapshot_rx: watch::Receiver<Arc<TopologySnapshot>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for DynamicTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicTopology")
            .field("service_id", &self.service_id)
            .finish()
    }
}

impl DynamicTopology {
    /// Open a watch and block on the first placement value. This is the only
    /// synchronous blocking step; an invalid initial placement fails
    /// initialization outright.
    pub async fn new(store: Arc<dyn PlacementStore>, service_id: impl Into<String>) -> Result<Self> {
        let service_id = service_id.into();
        let mut updates = store.watch(&service_id).await?;

        info!(service_id = %service_id, "waiting for initial placement value");
        let first = updates.recv().await.ok_or_else(|| {
            Error::InvalidTopology("placement watch closed before delivering a value".to_string())
        })?;
        let snapshot = Arc::new(TopologySnapshot::from_placement(&first)?);
        info!(
            service_id = %service_id,
            num_shards = snapshot.num_shards(),
            replicas = snapshot.replicas(),
            instances = snapshot.host_shards().len(),
            "initial placement received"
        );

        let (tx, rx) = watch::channel(snapshot);
        let closed = CancellationToken::new();
        tokio::spawn(run_update_loop(updates, tx, closed.clone()));

        Ok(Self {
            store,
            service_id,
            snapshot_rx: rx,
            closed,
        })
    }

    /// The current snapshot. A single reference clone; never blocks the
    /// update path.
    pub fn get(&self) -> Arc<TopologySnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn watch(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.snapshot_rx.clone()
    }

    /// Mark shard replicas on an instance as available in the placement
    /// store. Not serialized locally.
    pub async fn mark_shards_available(&self, instance_id: &str, shard_ids: &[u32]) -> Result<()> {
        self.store
            .mark_shards_available(&self.service_id, instance_id, shard_ids)
            .await
    }

    /// Stop the update loop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

async fn run_update_loop(
    mut updates: mpsc::Receiver<ServicePlacement>,
    tx: watch::Sender<Arc<TopologySnapshot>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            next = updates.recv() => match next {
                None => {
                    info!("placement watch channel closed, closing topology");
                    closed.cancel();
                    break;
                }
                Some(raw) => match TopologySnapshot::from_placement(&raw) {
                    Ok(snapshot) => {
                        debug!(
                            num_shards = snapshot.num_shards(),
                            instances = snapshot.host_shards().len(),
                            "publishing placement update"
                        );
                        if tx.send(Arc::new(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring invalid placement update"),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::placement::{PlacementInstance, PlacementShard, ShardState};
    use std::time::Duration;

    fn placement(num_shards: u32, instance_shards: &[(&str, &[u32])]) -> ServicePlacement {
        ServicePlacement {
            replicas: 1,
            num_shards,
            instances: instance_shards
                .iter()
                .map(|(id, shards)| PlacementInstance {
                    id: id.to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9474,
                    shards: Some(
                        shards
                            .iter()
                            .map(|&id| PlacementShard {
                                id,
                                state: ShardState::Available,
                            })
                            .collect(),
                    ),
                })
                .collect(),
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn initializes_from_first_value() {
        let store = Arc::new(LocalPlacementStore::with_placement(placement(
            2,
            &[("a", &[0, 1])],
        )));
        let topo = DynamicTopology::new(store, "borealdb").await.unwrap();
        assert_eq!(topo.get().num_shards(), 2);
        assert!(!topo.is_closed());
    }

    #[tokio::test]
    async fn fails_init_on_invalid_placement() {
        // shard 1 missing
        let store = Arc::new(LocalPlacementStore::with_placement(placement(
            2,
            &[("a", &[0])],
        )));
        let err = DynamicTopology::new(store, "borealdb").await.unwrap_err();
        assert!(matches!(err, Error::MissingShard(1)));
    }

    #[tokio::test]
    async fn publishes_valid_updates() {
        let store = Arc::new(LocalPlacementStore::with_placement(placement(
            1,
            &[("a", &[0])],
        )));
        let topo = DynamicTopology::new(Arc::clone(&store) as Arc<dyn PlacementStore>, "borealdb")
            .await
            .unwrap();

        store.update(placement(2, &[("a", &[0, 1]), ("b", &[0, 1])]));
        wait_for(|| topo.get().num_shards() == 2).await;
        assert_eq!(topo.get().host_shards().len(), 2);
    }

    #[tokio::test]
    async fn retains_snapshot_on_invalid_update() {
        let store = Arc::new(LocalPlacementStore::with_placement(placement(
            1,
            &[("a", &[0])],
        )));
        let topo = DynamicTopology::new(Arc::clone(&store) as Arc<dyn PlacementStore>, "borealdb")
            .await
            .unwrap();

        // invalid: declares shard 9 for a 1-shard keyspace
        store.update(placement(1, &[("a", &[0, 9])]));
        // then a valid one to prove the loop survived
        store.update(placement(2, &[("a", &[0, 1])]));
        wait_for(|| topo.get().num_shards() == 2).await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = Arc::new(LocalPlacementStore::with_placement(placement(
            1,
            &[("a", &[0])],
        )));
        let topo = DynamicTopology::new(store, "borealdb").await.unwrap();
        topo.close();
        topo.close();
        assert!(topo.is_closed());
    }

    /// Store whose watch channel the test controls directly.
    struct ChannelPlacementStore {
        rx: Mutex<Option<mpsc::Receiver<ServicePlacement>>>,
    }

    #[async_trait]
    impl PlacementStore for ChannelPlacementStore {
        async fn watch(&self, _service_id: &str) -> Result<mpsc::Receiver<ServicePlacement>> {
            self.rx
                .lock()
                .take()
                .ok_or_else(|| Error::Internal("watch already taken".to_string()))
        }

        async fn mark_shards_available(
            &self,
            _service_id: &str,
            _instance_id: &str,
            _shard_ids: &[u32],
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn closes_when_upstream_channel_drops() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(placement(1, &[("a", &[0])])).await.unwrap();
        let store = Arc::new(ChannelPlacementStore {
            rx: Mutex::new(Some(rx)),
        });
        let topo = DynamicTopology::new(store, "borealdb").await.unwrap();
        assert!(!topo.is_closed());

        drop(tx);
        wait_for(|| topo.is_closed()).await;
    }

    #[tokio::test]
    async fn mark_shards_available_flows_back_through_watch() {
        let mut base = placement(2, &[("a", &[0, 1])]);
        base.instances[0].shards.as_mut().unwrap()[1].state = ShardState::Initializing;
        let store = Arc::new(LocalPlacementStore::with_placement(base));
        let topo = DynamicTopology::new(Arc::clone(&store) as Arc<dyn PlacementStore>, "borealdb")
            .await
            .unwrap();

        topo.mark_shards_available("a", &[1]).await.unwrap();
        wait_for(|| {
            topo.get().host_shards()[0].shards.get(&1) == Some(&ShardState::Available)
        })
        .await;
    }
}
