//! Standalone broker binary.
//!
//! Production deployments watch the cluster's placement service; the
//! `--datanodes` flag seeds an in-memory placement for development, where
//! every listed datanode replicates every shard.

use borealdb_broker::api::{build_http_router, ApiState};
use borealdb_broker::broker::BrokerTelemetry;
use borealdb_broker::cluster::{
    DynamicTopology, LocalPlacementStore, PlacementInstance, PlacementShard, PlacementStore,
    ServicePlacement, ShardState,
};
use borealdb_broker::datanode::{DataNodeQueryClient, HttpDataNodeClient};
use borealdb_broker::telemetry::Telemetry;
use borealdb_broker::{BrokerConfig, Error, Result};

use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "borealdb-broker", about = "BorealDB distributed query broker")]
struct Args {
    /// Address to serve the query API on
    #[arg(long, env = "BOREAL_LISTEN", default_value = "0.0.0.0:9374")]
    listen: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BOREAL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Comma-separated datanode addresses for the dev-mode placement
    #[arg(long, env = "BOREAL_DATANODES", default_value = "127.0.0.1:9474")]
    datanodes: String,

    /// Total shard count for the dev-mode placement
    #[arg(long, env = "BOREAL_NUM_SHARDS", default_value_t = 8)]
    num_shards: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BrokerConfig::from_env()?;

    let telemetry = Telemetry::init(
        "borealdb-broker",
        &config.cluster.instance_id,
        &args.log_level,
    )?;
    let broker_metrics = Arc::new(BrokerTelemetry::new(&telemetry.meter("borealdb.broker")));

    let store: Arc<dyn PlacementStore> = Arc::new(dev_placement_store(&args)?);
    let topology = Arc::new(DynamicTopology::new(store, &config.cluster.namespace).await?);
    let client: Arc<dyn DataNodeQueryClient> = Arc::new(HttpDataNodeClient::new(
        config.query.clone(),
        Arc::clone(&broker_metrics),
    )?);

    let router = build_http_router(ApiState {
        topology: Arc::clone(&topology),
        client,
        telemetry: broker_metrics,
    });

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(
        addr = %args.listen,
        instance_id = %config.cluster.instance_id,
        namespace = %config.cluster.namespace,
        "broker listening"
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    topology.close();
    info!("broker shut down");
    Ok(())
}

fn dev_placement_store(args: &Args) -> Result<LocalPlacementStore> {
    let all_shards: Vec<PlacementShard> = (0..args.num_shards)
        .map(|id| PlacementShard {
            id,
            state: ShardState::Available,
        })
        .collect();

    let instances: Vec<PlacementInstance> = args
        .datanodes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, addr)| {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| Error::Config(format!("datanode address '{addr}' has no port")))?;
            let port = port
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("invalid datanode port in '{addr}': {e}")))?;
            Ok(PlacementInstance {
                id: format!("datanode-{i}"),
                host: host.to_string(),
                port,
                shards: Some(all_shards.clone()),
            })
        })
        .collect::<Result<_>>()?;

    if instances.is_empty() {
        return Err(Error::Config(
            "at least one datanode address is required".to_string(),
        ));
    }

    Ok(LocalPlacementStore::with_placement(ServicePlacement {
        replicas: instances.len(),
        num_shards: args.num_shards,
        instances,
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
