//! Transport to the datanode query engine.
//!
//! A sub-query is a `POST /query` carrying the AQL query restricted to the
//! shards the target host was assigned. Transport failures are retried a
//! small, bounded number of times; a response the datanode produced is never
//! retried here.

use crate::broker::telemetry::BrokerTelemetry;
use crate::cluster::Host;
use crate::config::QueryClientConfig;
use crate::query::{AQLQuery, ResultNode};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client side of the datanode query RPC.
#[async_trait]
pub trait DataNodeQueryClient: Send + Sync {
    /// Fetch the raw JSON body of a partial result, used for streaming
    /// scans. By construction of the datanode API the body is the content of
    /// a row array without the enclosing brackets.
    async fn query_raw(
        &self,
        host: &Host,
        query: &AQLQuery,
        cancel: &CancellationToken,
    ) -> Result<Bytes>;

    /// Fetch and parse a partial aggregate result tree. `hll` switches the
    /// datanode to sketch framing for distinct-count measures.
    async fn query(
        &self,
        host: &Host,
        query: &AQLQuery,
        hll: bool,
        cancel: &CancellationToken,
    ) -> Result<ResultNode>;
}

/// HTTP implementation of [`DataNodeQueryClient`].
pub struct HttpDataNodeClient {
    http: reqwest::Client,
    config: QueryClientConfig,
    telemetry: Arc<BrokerTelemetry>,
}

impl HttpDataNodeClient {
    pub fn new(config: QueryClientConfig, telemetry: Arc<BrokerTelemetry>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build datanode http client: {e}")))?;
        Ok(Self {
            http,
            config,
            telemetry,
        })
    }

    fn query_url(&self, host: &Host, hll: bool) -> String {
        format!(
            "http://{}/query?deviceChoosingTimeout={}&enableHashReduction={}&hll={}",
            host.addr, self.config.device_choosing_timeout, self.config.enable_hash_reduction, hll,
        )
    }

    /// One fan-out leg: POST the query, retrying transport failures up to the
    /// configured budget. An error on the final attempt always surfaces,
    /// even if an earlier attempt produced bytes.
    async fn post_query(
        &self,
        host: &Host,
        query: &AQLQuery,
        hll: bool,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let url = self.query_url(host, hll);
        let mut last_error = String::new();

        for attempt in 1..=self.config.rpc_retries {
            debug!(host = %host.id, attempt, "sending query to datanode");

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = self.http.post(&url).json(query).send() => r,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    self.telemetry.record_datanode_failure(&host.id);
                    warn!(host = %host.id, attempt, error = %e, "fetch from datanode failed");
                    last_error = e.to_string();
                    continue;
                }
            };

            if !response.status().is_success() {
                // the datanode answered; its error envelope is not retried
                self.telemetry.record_datanode_failure(&host.id);
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Query(format!(
                    "datanode {} returned {status}: {body}",
                    host.id
                )));
            }

            let body = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                b = response.bytes() => b,
            };
            match body {
                Ok(bytes) => {
                    debug!(host = %host.id, attempt, size = bytes.len(), "fetch from datanode succeeded");
                    return Ok(bytes);
                }
                Err(e) => {
                    self.telemetry.record_datanode_failure(&host.id);
                    warn!(host = %host.id, attempt, error = %e, "reading datanode response failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::DataNodeQuery {
            host: host.id.clone(),
            attempts: self.config.rpc_retries,
            message: last_error,
        })
    }
}

#[async_trait]
impl DataNodeQueryClient for HttpDataNodeClient {
    async fn query_raw(
        &self,
        host: &Host,
        query: &AQLQuery,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.post_query(host, query, false, cancel).await
    }

    async fn query(
        &self,
        host: &Host,
        query: &AQLQuery,
        hll: bool,
        cancel: &CancellationToken,
    ) -> Result<ResultNode> {
        let body = self.post_query(host, query, hll, cancel).await?;
        let started = Instant::now();
        let tree: ResultNode = serde_json::from_slice(&body)?;
        self.telemetry.record_serde_duration(started.elapsed());
        Ok(tree)
    }
}
