//! Broker configuration
//!
//! Mirrors the recognized keys of the cluster configuration file. The file
//! itself is parsed by the embedding service, which deserializes into the
//! structs below; `BrokerConfig::from_env` covers the standalone binary.

use crate::{Error, Result};
use serde::Deserialize;
use std::str::FromStr;

/// Top-level broker configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Cluster membership and placement store options
    pub cluster: ClusterConfig,
    /// Datanode query client options
    pub query: QueryClientConfig,
}

/// Cluster configuration (`cluster.*` keys)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Placement service key namespace
    pub namespace: String,
    /// Identity of this broker instance, used for telemetry attribution
    pub instance_id: String,
    /// Placement store connection options, forwarded to the store client
    pub etcd: EtcdConfig,
    /// Liveness cadence of the placement service session
    pub heartbeat: HeartbeatConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "borealdb".to_string(),
            instance_id: "broker-0".to_string(),
            etcd: EtcdConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Placement store connection options (`cluster.etcd`)
///
/// Opaque to the broker; handed to whichever placement store client the
/// deployment wires in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub dial_timeout_secs: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            dial_timeout_secs: 5,
        }
    }
}

/// Heartbeat cadence (`cluster.heartbeat.{timeout,interval}`)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            interval_secs: 10,
        }
    }
}

/// Datanode query client options (`query.*` keys)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryClientConfig {
    /// Forwarded verbatim to the datanode
    pub device_choosing_timeout: i64,
    /// Forwarded verbatim to the datanode
    pub enable_hash_reduction: bool,
    /// Transport retry budget per sub-query
    pub rpc_retries: usize,
    /// Per-request timeout for datanode calls
    pub request_timeout_secs: u64,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            device_choosing_timeout: 5,
            enable_hash_reduction: false,
            rpc_retries: 3,
            request_timeout_secs: 30,
        }
    }
}

impl BrokerConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables:
    /// - `BOREAL_CLUSTER_NAMESPACE`
    /// - `BOREAL_INSTANCE_ID`
    /// - `BOREAL_ETCD_ENDPOINTS` (comma-separated)
    /// - `BOREAL_ETCD_DIAL_TIMEOUT_SECS`
    /// - `BOREAL_HEARTBEAT_TIMEOUT_SECS` / `BOREAL_HEARTBEAT_INTERVAL_SECS`
    /// - `BOREAL_DEVICE_CHOOSING_TIMEOUT`
    /// - `BOREAL_ENABLE_HASH_REDUCTION`
    /// - `BOREAL_RPC_RETRIES`
    /// - `BOREAL_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let mut config = BrokerConfig::default();

        if let Ok(v) = std::env::var("BOREAL_CLUSTER_NAMESPACE") {
            config.cluster.namespace = v;
        }
        if let Ok(v) = std::env::var("BOREAL_INSTANCE_ID") {
            config.cluster.instance_id = v;
        }
        if let Ok(v) = std::env::var("BOREAL_ETCD_ENDPOINTS") {
            config.cluster.etcd.endpoints = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_parse("BOREAL_ETCD_DIAL_TIMEOUT_SECS")? {
            config.cluster.etcd.dial_timeout_secs = v;
        }
        if let Some(v) = env_parse("BOREAL_HEARTBEAT_TIMEOUT_SECS")? {
            config.cluster.heartbeat.timeout_secs = v;
        }
        if let Some(v) = env_parse("BOREAL_HEARTBEAT_INTERVAL_SECS")? {
            config.cluster.heartbeat.interval_secs = v;
        }
        if let Some(v) = env_parse("BOREAL_DEVICE_CHOOSING_TIMEOUT")? {
            config.query.device_choosing_timeout = v;
        }
        if let Some(v) = env_parse_bool("BOREAL_ENABLE_HASH_REDUCTION")? {
            config.query.enable_hash_reduction = v;
        }
        if let Some(v) = env_parse("BOREAL_RPC_RETRIES")? {
            config.query.rpc_retries = v;
        }
        if let Some(v) = env_parse("BOREAL_REQUEST_TIMEOUT_SECS")? {
            config.query.request_timeout_secs = v;
        }

        if config.query.rpc_retries == 0 {
            return Err(Error::Config(
                "BOREAL_RPC_RETRIES must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{name} is invalid: {e}")))
}

fn env_parse_bool(name: &str) -> Result<Option<bool>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BrokerConfig::default();
        assert_eq!(config.cluster.namespace, "borealdb");
        assert_eq!(config.query.rpc_retries, 3);
        assert!(config.query.request_timeout_secs > 0);
    }

    #[test]
    fn deserializes_recognized_keys() {
        let config: BrokerConfig = serde_json::from_str(
            r#"{
                "cluster": {
                    "namespace": "prod",
                    "instance_id": "broker-7",
                    "etcd": {"endpoints": ["etcd-0:2379", "etcd-1:2379"]},
                    "heartbeat": {"timeout_secs": 60, "interval_secs": 20}
                },
                "query": {"device_choosing_timeout": 10, "enable_hash_reduction": true}
            }"#,
        )
        .unwrap();
        assert_eq!(config.cluster.namespace, "prod");
        assert_eq!(config.cluster.etcd.endpoints.len(), 2);
        assert_eq!(config.cluster.heartbeat.timeout_secs, 60);
        assert!(config.query.enable_hash_reduction);
        // unset keys keep defaults
        assert_eq!(config.query.rpc_retries, 3);
    }
}
