//! # BorealDB Broker
//!
//! The distributed query broker of BorealDB, a sharded columnar analytics
//! database. The broker owns no data: it watches the externally curated
//! shard placement, assigns every shard to exactly one healthy datanode
//! replica, fans the query out in parallel, and merges partial results into
//! a single response.
//!
//! ## Architecture
//!
//! - **Topology**: a validated, atomically swapped snapshot of the placement,
//!   fed by a key/value watch ([`cluster::DynamicTopology`])
//! - **Planning**: one sub-query per datanode, covering its assigned shards
//!   exactly once ([`cluster::calculate_shard_assignment`])
//! - **Execution**: parallel fan-out with bounded retry and cooperative
//!   cancellation ([`datanode::HttpDataNodeClient`])
//! - **Reduction**: streaming concatenation for scans
//!   ([`broker::NonAggQueryPlan`]), deep merge under the aggregation
//!   operator for everything else ([`broker::AggQueryPlan`])

pub mod api;
pub mod broker;
pub mod cluster;
pub mod config;
pub mod datanode;
pub mod query;
pub mod telemetry;

mod error;

pub use config::BrokerConfig;
pub use error::{Error, Result};
